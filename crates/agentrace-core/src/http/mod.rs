//! Generic HTTP caller used by `api_call` steps.

pub mod caller;

pub use caller::{
    BoxHttpCaller, DisabledHttpCaller, HttpCaller, HttpCallerDyn, HttpRequest, HttpResponse,
};
