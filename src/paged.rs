//! Paged activity streaming and long-running-operation (LRO) helpers.
//! Composes the activity/context machinery and the orchestration context
//! into two higher-level orchestrator-side patterns, since both interact
//! directly with replay determinism and so can't be left to user code to
//! reinvent.

use std::marker::PhantomData;

use chrono::Duration as ChronoDuration;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::orchestration::{OrchestrationContext, OrchestrationError};

/// One page of results from a paged activity, with an opaque continuation
/// token the next invocation echoes back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub values: Vec<T>,
    pub continuation_token: Option<String>,
}

/// Consumes a paged activity one activity invocation per page. The
/// page-size hint is advisory; an activity implementation is free to
/// ignore it.
pub struct PagedStream<'a, T> {
    ctx: &'a OrchestrationContext,
    activity_name: String,
    base_input: serde_json::Value,
    page_size_hint: Option<u32>,
    continuation_token: Option<String>,
    exhausted: bool,
    _marker: PhantomData<T>,
}

impl<'a, T: DeserializeOwned + Serialize + 'static> PagedStream<'a, T> {
    pub fn new(ctx: &'a OrchestrationContext, activity_name: impl Into<String>, base_input: serde_json::Value) -> Self {
        Self {
            ctx,
            activity_name: activity_name.into(),
            base_input,
            page_size_hint: None,
            continuation_token: None,
            exhausted: false,
            _marker: PhantomData,
        }
    }

    pub fn with_page_size_hint(mut self, hint: u32) -> Self {
        self.page_size_hint = Some(hint);
        self
    }

    /// Fetch the next page, or `None` once the activity reports no further
    /// continuation token.
    pub async fn next_page(&mut self) -> Result<Option<Page<T>>, OrchestrationError> {
        if self.exhausted {
            return Ok(None);
        }

        let mut input = self.base_input.clone();
        merge_page_request(&mut input, self.continuation_token.as_deref(), self.page_size_hint);

        let page: Page<T> = self.ctx.schedule_activity(&self.activity_name, input).await?;
        self.continuation_token = page.continuation_token.clone();
        if self.continuation_token.is_none() {
            self.exhausted = true;
        }
        Ok(Some(page))
    }

    /// Drain every remaining page's elements, one activity invocation per
    /// page ("await-all" strategy — the whole stream materializes in this
    /// turn's history).
    pub async fn collect_all(mut self) -> Result<Vec<T>, OrchestrationError> {
        let mut all = Vec::new();
        while let Some(page) = self.next_page().await? {
            all.extend(page.values);
        }
        Ok(all)
    }
}

fn merge_page_request(input: &mut serde_json::Value, continuation_token: Option<&str>, page_size_hint: Option<u32>) {
    let serde_json::Value::Object(map) = input else {
        return;
    };
    if let Some(token) = continuation_token {
        map.insert("continuation_token".to_string(), serde_json::Value::String(token.to_string()));
    }
    if let Some(hint) = page_size_hint {
        map.insert("page_size_hint".to_string(), serde_json::Value::Number(hint.into()));
    }
}

/// What an LRO start/poll activity reports back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationHandle<T> {
    pub has_completed: bool,
    pub value: Option<T>,
    /// How long to wait before the next poll, if not yet complete.
    pub poll_delay_ms: u64,
    /// Opaque state the poll activity needs to check progress again.
    pub operation_state: serde_json::Value,
}

/// Drive a start-activity + poll long-running-operation pattern to
/// completion: call `start_activity` once; while the returned handle isn't
/// complete, create a timer for `poll_delay` and call `poll_activity`
/// again. For operations with an unbounded poll count, run this inside a
/// sub-orchestration and have its `run` call `ctx.continue_as_new` with
/// `handle.operation_state` every so many iterations, so one execution's
/// history never grows past what a handful of polls would add.
pub async fn run_lro<T: DeserializeOwned + Serialize + 'static>(
    ctx: &OrchestrationContext,
    start_activity: &str,
    start_input: serde_json::Value,
    poll_activity: &str,
) -> Result<T, OrchestrationError> {
    let handle: OperationHandle<T> = ctx.schedule_activity(start_activity, start_input).await?;
    poll_until_done(ctx, poll_activity, handle).await
}

/// The poll half of [`run_lro`], exposed separately so a wait
/// sub-orchestration can `continue_as_new` back into it directly with the
/// operation's carried-over state instead of restarting from the start
/// activity.
pub async fn poll_until_done<T: DeserializeOwned + Serialize + 'static>(
    ctx: &OrchestrationContext,
    poll_activity: &str,
    mut handle: OperationHandle<T>,
) -> Result<T, OrchestrationError> {
    loop {
        if handle.has_completed {
            return handle
                .value
                .ok_or_else(|| OrchestrationError::user("operation reported complete with no value"));
        }

        let fire_at = ctx.current_utc_datetime() + ChronoDuration::milliseconds(handle.poll_delay_ms as i64);
        ctx.create_timer(fire_at).await?;

        handle = ctx.schedule_activity(poll_activity, handle.operation_state.clone()).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_request_merges_continuation_and_hint() {
        let mut input = serde_json::json!({"bucket": "reports"});
        merge_page_request(&mut input, Some("tok-1"), Some(50));
        assert_eq!(input["continuation_token"], "tok-1");
        assert_eq!(input["page_size_hint"], 50);
    }
}
