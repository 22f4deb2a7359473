//! Metrics aggregation over persisted execution history.
//!
//! `compute_metrics` is a pure function of the loaded executions and a
//! reference `now`, so the orchestrator can feed it persisted history and
//! tests can pin the clock.

use std::collections::{BTreeMap, HashMap};

use agentrace_types::metrics::{
    DailyTrend, ErrorFrequency, ExecutionMetrics, StepPerformance, TimeRange,
};
use agentrace_types::trace::{AgentTraceExecution, ExecutionStatus, StepStatus};
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

/// Number of distinct error messages reported.
pub const TOP_ERRORS: usize = 5;

/// `part` as a percentage of `whole` (0 when `whole` is 0).
fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0u64), |(s, c), v| (s + v, c + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

/// Compute metrics for one template over an optional look-back window.
pub fn compute_metrics(
    executions: &[AgentTraceExecution],
    template_id: &Uuid,
    range: Option<TimeRange>,
    now: DateTime<Utc>,
) -> ExecutionMetrics {
    let since = range.map(|r| now - r.duration());
    let selected: Vec<&AgentTraceExecution> = executions
        .iter()
        .filter(|e| e.template_id == *template_id)
        .filter(|e| since.is_none_or(|since| e.start_time >= since))
        .collect();

    let total = selected.len() as u64;
    let completed: Vec<&AgentTraceExecution> = selected
        .iter()
        .copied()
        .filter(|e| e.status == ExecutionStatus::Completed)
        .collect();
    let failed = selected
        .iter()
        .filter(|e| e.status == ExecutionStatus::Failed)
        .count() as u64;

    // Only steps that went through the cache carry a flag.
    let flags: Vec<bool> = selected
        .iter()
        .flat_map(|e| e.steps.iter())
        .filter_map(|s| s.metadata.cache_hit)
        .collect();
    let hits = flags.iter().filter(|hit| **hit).count() as u64;

    ExecutionMetrics {
        total_executions: total,
        completed_executions: completed.len() as u64,
        failed_executions: failed,
        success_rate: percent(completed.len() as u64, total),
        error_rate: percent(failed, total),
        average_duration_ms: mean(completed.iter().map(|e| e.duration_ms.unwrap_or(0) as f64)),
        average_cost: mean(completed.iter().map(|e| e.metadata.total_cost)),
        average_tokens: mean(completed.iter().map(|e| e.metadata.total_tokens as f64)),
        cache_hit_rate: percent(hits, flags.len() as u64),
        top_errors: top_errors(&selected),
        step_performance: step_performance(&selected),
        daily_trends: daily_trends(&selected),
    }
}

fn top_errors(executions: &[&AgentTraceExecution]) -> Vec<ErrorFrequency> {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for error in executions
        .iter()
        .filter(|e| e.status == ExecutionStatus::Failed)
        .filter_map(|e| e.error.as_deref())
    {
        *counts.entry(error).or_default() += 1;
    }

    let mut errors: Vec<ErrorFrequency> = counts
        .into_iter()
        .map(|(message, count)| ErrorFrequency {
            message: message.to_string(),
            count,
        })
        .collect();
    errors.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.message.cmp(&b.message)));
    errors.truncate(TOP_ERRORS);
    errors
}

#[derive(Default)]
struct StepTally {
    completed: u64,
    failed: u64,
    duration_ms: f64,
    cost: f64,
}

fn step_performance(executions: &[&AgentTraceExecution]) -> Vec<StepPerformance> {
    let mut tallies: BTreeMap<&str, StepTally> = BTreeMap::new();
    for step in executions.iter().flat_map(|e| e.steps.iter()) {
        let tally = match step.status {
            StepStatus::Completed | StepStatus::Failed => tallies.entry(step.name.as_str()).or_default(),
            _ => continue,
        };
        if step.status == StepStatus::Completed {
            tally.completed += 1;
            tally.duration_ms += step.duration_ms.unwrap_or(0) as f64;
            tally.cost += step.metadata.cost;
        } else {
            tally.failed += 1;
        }
    }

    tallies
        .into_iter()
        .map(|(name, t)| {
            let runs = t.completed + t.failed;
            let per_completed = |v: f64| if t.completed == 0 { 0.0 } else { v / t.completed as f64 };
            StepPerformance {
                step_name: name.to_string(),
                executions: runs,
                average_duration_ms: per_completed(t.duration_ms),
                success_rate: percent(t.completed, runs),
                average_cost: per_completed(t.cost),
            }
        })
        .collect()
}

fn daily_trends(executions: &[&AgentTraceExecution]) -> Vec<DailyTrend> {
    let mut days: BTreeMap<NaiveDate, Vec<&AgentTraceExecution>> = BTreeMap::new();
    for execution in executions {
        days.entry(execution.start_time.date_naive())
            .or_default()
            .push(*execution);
    }

    days.into_iter()
        .map(|(date, bucket)| {
            let completed: Vec<&&AgentTraceExecution> = bucket
                .iter()
                .filter(|e| e.status == ExecutionStatus::Completed)
                .collect();
            DailyTrend {
                date,
                executions: bucket.len() as u64,
                average_duration_ms: mean(completed.iter().map(|e| e.duration_ms.unwrap_or(0) as f64)),
                average_cost: mean(completed.iter().map(|e| e.metadata.total_cost)),
                success_rate: percent(completed.len() as u64, bucket.len() as u64),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrace_types::trace::{ExecutionMetadata, StepExecution};
    use chrono::{Duration, TimeZone};
    use serde_json::{Value, json};

    use crate::trace::testing::{custom_config, step};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    fn execution(
        template_id: Uuid,
        status: ExecutionStatus,
        started: DateTime<Utc>,
        cost: f64,
    ) -> AgentTraceExecution {
        let mut s = StepExecution::pending(&step("fetch", &[], custom_config("echo", json!({}))));
        s.status = if status == ExecutionStatus::Completed {
            StepStatus::Completed
        } else {
            StepStatus::Failed
        };
        s.duration_ms = Some(100);
        s.metadata.cost = cost;
        s.metadata.cache_hit = Some(cost == 0.0);

        AgentTraceExecution {
            id: Uuid::now_v7(),
            template_id,
            name: "t".into(),
            owner_id: "o".into(),
            status,
            start_time: started,
            end_time: Some(started + Duration::milliseconds(200)),
            duration_ms: Some(200),
            steps: vec![s],
            input: Value::Null,
            variables: json!({}),
            output: None,
            error: (status == ExecutionStatus::Failed).then(|| "steps failed: fetch".to_string()),
            metadata: ExecutionMetadata {
                total_cost: cost,
                ..ExecutionMetadata::default()
            },
            parent_execution_id: None,
        }
    }

    #[test]
    fn seven_of_ten_is_seventy_percent() {
        let id = Uuid::now_v7();
        let mut executions = Vec::new();
        for _ in 0..7 {
            executions.push(execution(id, ExecutionStatus::Completed, now(), 0.5));
        }
        for _ in 0..3 {
            executions.push(execution(id, ExecutionStatus::Failed, now(), 0.0));
        }

        let metrics = compute_metrics(&executions, &id, None, now());
        assert_eq!(metrics.total_executions, 10);
        assert_eq!(metrics.success_rate, 70.0);
        assert_eq!(metrics.error_rate, 30.0);
        assert!((metrics.average_cost - 0.5).abs() < 1e-9);
        assert_eq!(metrics.average_duration_ms, 200.0);
        assert_eq!(metrics.cache_hit_rate, 30.0);
        assert_eq!(
            metrics.top_errors,
            vec![ErrorFrequency {
                message: "steps failed: fetch".into(),
                count: 3,
            }]
        );

        let fetch = &metrics.step_performance[0];
        assert_eq!(fetch.step_name, "fetch");
        assert_eq!(fetch.executions, 10);
        assert_eq!(fetch.success_rate, 70.0);
        assert!((fetch.average_cost - 0.5).abs() < 1e-9);
    }

    #[test]
    fn window_and_template_filter() {
        let id = Uuid::now_v7();
        let executions = vec![
            execution(id, ExecutionStatus::Completed, now() - Duration::minutes(30), 1.0),
            execution(id, ExecutionStatus::Completed, now() - Duration::hours(3), 1.0),
            execution(Uuid::now_v7(), ExecutionStatus::Completed, now(), 1.0),
        ];

        let hour = compute_metrics(&executions, &id, Some(TimeRange::OneHour), now());
        assert_eq!(hour.total_executions, 1);

        let all = compute_metrics(&executions, &id, None, now());
        assert_eq!(all.total_executions, 2);
    }

    #[test]
    fn cache_rate_ignores_unflagged_steps() {
        let id = Uuid::now_v7();
        let mut exec = execution(id, ExecutionStatus::Completed, now(), 0.0);
        let mut unflagged = exec.steps[0].clone();
        unflagged.name = "other".into();
        unflagged.metadata.cache_hit = None;
        exec.steps.push(unflagged);

        let metrics = compute_metrics(&[exec], &id, None, now());
        assert_eq!(metrics.cache_hit_rate, 100.0);
        assert_eq!(metrics.step_performance.len(), 2);
    }

    #[test]
    fn daily_trends_bucket_by_start_date() {
        let id = Uuid::now_v7();
        let executions = vec![
            execution(id, ExecutionStatus::Completed, now() - Duration::days(1), 1.0),
            execution(id, ExecutionStatus::Failed, now() - Duration::days(1), 0.0),
            execution(id, ExecutionStatus::Completed, now(), 3.0),
        ];

        let metrics = compute_metrics(&executions, &id, Some(TimeRange::SevenDays), now());
        assert_eq!(metrics.daily_trends.len(), 2);
        let first = &metrics.daily_trends[0];
        assert_eq!(first.date, NaiveDate::from_ymd_opt(2026, 3, 9).unwrap());
        assert_eq!(first.executions, 2);
        assert_eq!(first.success_rate, 50.0);
        assert!((metrics.daily_trends[1].average_cost - 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_history_yields_zeroes() {
        let metrics = compute_metrics(&[], &Uuid::now_v7(), Some(TimeRange::ThirtyDays), now());
        assert_eq!(metrics, ExecutionMetrics::default());
    }
}
