use crate::cluster::Cluster;
use crate::crd::{ConditionStatus, ConditionType, Kappnav, StatusCondition};
use crate::error::Error;
use crate::logging::PassLog;
use chrono::{DateTime, Utc};
use kube::runtime::controller::Action;
use std::time::Duration;

/// Upper bound of the retry delay after repeated failures.
pub const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// Delay used for the first failure and when the status write itself failed.
pub const MIN_RETRY_INTERVAL: Duration = Duration::from_secs(1);

fn previous_condition(instance: &Kappnav, condition_type: ConditionType) -> StatusCondition {
    instance
        .status
        .as_ref()
        .and_then(|status| status.condition(condition_type))
        .cloned()
        .unwrap_or(StatusCondition {
            condition_type,
            ..Default::default()
        })
}

/// `lastUpdateTime` never moves backwards, even if the clock does.
fn update_time(previous: &StatusCondition, now: DateTime<Utc>) -> DateTime<Utc> {
    match previous.last_update_time {
        Some(last) if last > now => last,
        _ => now,
    }
}

pub fn failure_condition(
    previous: &StatusCondition,
    error: &Error,
    now: DateTime<Utc>,
) -> StatusCondition {
    let updated = update_time(previous, now);
    let transitioned = match previous.status {
        ConditionStatus::True => Some(updated),
        ConditionStatus::False => previous.last_transition_time,
    };
    StatusCondition {
        last_transition_time: transitioned,
        last_update_time: Some(updated),
        reason: error.reason(),
        message: error.to_string(),
        status: ConditionStatus::False,
        condition_type: previous.condition_type,
    }
}

pub fn success_condition(previous: &StatusCondition, now: DateTime<Utc>) -> StatusCondition {
    let updated = update_time(previous, now);
    let transitioned = match previous.status {
        ConditionStatus::False => Some(updated),
        ConditionStatus::True => previous.last_transition_time,
    };
    StatusCondition {
        last_transition_time: transitioned,
        last_update_time: Some(updated),
        reason: String::new(),
        message: String::new(),
        status: ConditionStatus::True,
        condition_type: previous.condition_type,
    }
}

/// Delay before the next pass after `error`, or `None` when retrying cannot
/// help.
pub fn retry_interval(
    previous: &StatusCondition,
    error: &Error,
    updated: DateTime<Utc>,
) -> Option<Duration> {
    if error.is_invalid() {
        return None;
    }
    let last_update = match (previous.status, previous.last_update_time) {
        (ConditionStatus::False, Some(last_update)) => last_update,
        _ => return Some(MIN_RETRY_INTERVAL),
    };

    let elapsed_millis = (updated - last_update).num_milliseconds().max(0) as u64;
    let elapsed = Duration::from_secs((elapsed_millis + 500) / 1000);
    Some(
        elapsed
            .saturating_mul(2)
            .clamp(MIN_RETRY_INTERVAL, MAX_RETRY_INTERVAL),
    )
}

/// Records `error` on the instance and decides when to try again.
pub async fn manage_error<C: Cluster>(
    cluster: &C,
    log: &PassLog,
    error: &Error,
    instance: &mut Kappnav,
    now: DateTime<Utc>,
) -> Action {
    let previous = previous_condition(instance, ConditionType::Reconciled);
    let condition = failure_condition(&previous, error, now);
    let updated = condition.last_update_time.unwrap_or(now);
    instance
        .status
        .get_or_insert_with(Default::default)
        .set_condition(condition);

    if let Err(e) = cluster.update_status(instance).await {
        log.error(format!("Unable to update status, Error: {}", e));
        return Action::requeue(MIN_RETRY_INTERVAL);
    }

    match retry_interval(&previous, error, updated) {
        Some(interval) => {
            log.debug(format!("Retrying in {}s", interval.as_secs()));
            Action::requeue(interval)
        }
        None => {
            log.warning(format!(
                "Not retrying, the request was rejected as invalid: {}",
                error
            ));
            Action::await_change()
        }
    }
}

/// Marks the instance reconciled. The next pass is triggered by a watch event.
pub async fn manage_success<C: Cluster>(
    cluster: &C,
    log: &PassLog,
    instance: &mut Kappnav,
    now: DateTime<Utc>,
) -> Action {
    let previous = previous_condition(instance, ConditionType::Reconciled);
    instance
        .status
        .get_or_insert_with(Default::default)
        .set_condition(success_condition(&previous, now));

    if let Err(e) = cluster.update_status(instance).await {
        log.error(format!("Unable to update status, Error: {}", e));
        return Action::requeue(MIN_RETRY_INTERVAL);
    }
    Action::await_change()
}
