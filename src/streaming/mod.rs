mod events;
mod extractor;

use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::Bytes;
pub use extractor::{ExtractedUsage, UsageExtractor, extract_buffered};
use futures_util::stream::Stream;
use tokio_util::task::TaskTracker;

use crate::{accounting::Accountant, observability::metrics};

/// Relays an upstream event stream chunk by chunk while extracting usage.
///
/// Chunks are yielded unchanged as soon as the inner stream produces them.
/// When the stream ends, fails, or is dropped (caller disconnected), whatever
/// usage was observed is handed to the [`Accountant`] on the task tracker so
/// the relay itself never waits on accounting.
pub struct UsageTrackingStream<S> {
    inner: S,
    /// `None` once the stream has settled.
    extractor: Option<UsageExtractor>,
    accountant: Arc<Accountant>,
    requested_model: String,
    task_tracker: TaskTracker,
}

impl<S> UsageTrackingStream<S>
where
    S: Stream<Item = Result<Bytes, io::Error>> + Unpin,
{
    pub fn new(
        stream: S,
        accountant: Arc<Accountant>,
        requested_model: String,
        task_tracker: TaskTracker,
    ) -> Self {
        Self {
            inner: stream,
            extractor: Some(UsageExtractor::new()),
            accountant,
            requested_model,
            task_tracker,
        }
    }
}

impl<S> UsageTrackingStream<S> {
    fn settle(&mut self, outcome: &'static str) {
        let Some(extractor) = self.extractor.take() else {
            return;
        };
        metrics::record_stream_end(outcome);

        let extracted = extractor.finish();
        if outcome != "completed" {
            tracing::warn!(
                outcome,
                has_usage = extracted.usage.is_some(),
                "Stream did not complete, accounting observed usage only"
            );
        }

        let accountant = self.accountant.clone();
        let requested_model = std::mem::take(&mut self.requested_model);
        self.task_tracker.spawn(async move {
            accountant.account(extracted, &requested_model).await;
        });
    }
}

impl<S> Stream for UsageTrackingStream<S>
where
    S: Stream<Item = Result<Bytes, io::Error>> + Unpin,
{
    type Item = Result<Bytes, io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if let Some(extractor) = self.extractor.as_mut() {
                    extractor.push(&chunk);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                self.settle("completed");
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => {
                tracing::warn!(error = %e, "Upstream stream failed mid-relay");
                self.settle("error");
                Poll::Ready(Some(Err(e)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> Drop for UsageTrackingStream<S> {
    fn drop(&mut self) {
        // Caller went away before the end: account what was seen so far.
        self.settle("dropped");
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{StreamExt, stream};

    use super::*;
    use crate::{accounting::tests::test_accountant, billing::BillingCycle, models::BudgetLevel};

    const BODY: &str = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"model\":\"claude-sonnet-4-5\",\"usage\":{\"input_tokens\":1000000,\"output_tokens\":1}}}\n\n",
        "event: message_delta\n",
        "data: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":0}}\n\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n\n",
    );

    fn chunks(body: &str, size: usize) -> Vec<Result<Bytes, io::Error>> {
        body.as_bytes()
            .chunks(size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect()
    }

    async fn settle(tracker: &TaskTracker) {
        tracker.close();
        tracker.wait().await;
        tracker.reopen();
    }

    #[tokio::test]
    async fn test_chunks_pass_through_unchanged() {
        let harness = test_accountant(100).await;
        let tracker = TaskTracker::new();
        let input = chunks(BODY, 7);
        let expected: Vec<Bytes> = input.iter().map(|c| c.as_ref().unwrap().clone()).collect();

        let tracking = UsageTrackingStream::new(
            stream::iter(input),
            harness.accountant.clone(),
            "claude-sonnet-4-5".into(),
            tracker.clone(),
        );
        let relayed: Vec<Bytes> = tracking.map(|c| c.unwrap()).collect().await;
        assert_eq!(relayed, expected);

        settle(&tracker).await;
        let cycle = BillingCycle::current(1);
        // 1M input tokens of claude-sonnet-4-5 at $3/1M
        assert_eq!(
            harness.db.usage().monthly_spend(&cycle).await.unwrap(),
            3_000_000
        );
    }

    #[tokio::test]
    async fn test_dropped_before_usage_accounts_nothing() {
        let harness = test_accountant(100).await;
        let tracker = TaskTracker::new();

        let mut tracking = UsageTrackingStream::new(
            stream::iter(chunks(BODY, 16)),
            harness.accountant.clone(),
            "claude-sonnet-4-5".into(),
            tracker.clone(),
        );
        // First chunk only; the start event is not complete yet.
        assert!(tracking.next().await.is_some());
        drop(tracking);

        settle(&tracker).await;
        let cycle = BillingCycle::current(1);
        assert_eq!(harness.db.usage().count_records(&cycle).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dropped_after_start_accounts_observed_usage() {
        let harness = test_accountant(100).await;
        let tracker = TaskTracker::new();
        let first_record_end = BODY.find("\n\n").unwrap() + 2;

        let input = vec![
            Ok(Bytes::copy_from_slice(BODY[..first_record_end].as_bytes())),
            Ok(Bytes::copy_from_slice(BODY[first_record_end..].as_bytes())),
        ];
        let mut tracking = UsageTrackingStream::new(
            stream::iter(input),
            harness.accountant.clone(),
            "claude-sonnet-4-5".into(),
            tracker.clone(),
        );
        assert!(tracking.next().await.is_some());
        drop(tracking);

        settle(&tracker).await;
        let cycle = BillingCycle::current(1);
        assert_eq!(harness.db.usage().count_records(&cycle).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stream_error_still_accounts() {
        let harness = test_accountant(100).await;
        let tracker = TaskTracker::new();
        let mut input = chunks(BODY, BODY.len());
        input.push(Err(io::Error::other("connection reset")));

        let tracking = UsageTrackingStream::new(
            stream::iter(input),
            harness.accountant.clone(),
            "claude-sonnet-4-5".into(),
            tracker.clone(),
        );
        let results: Vec<_> = tracking.collect().await;
        assert!(results.last().unwrap().is_err());

        settle(&tracker).await;
        let state = harness.enforcer.current_state(BillingCycle::current(1)).await.unwrap();
        assert_eq!(state.last_action, BudgetLevel::Normal);
        let cycle = BillingCycle::current(1);
        assert_eq!(harness.db.usage().count_records(&cycle).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unparsable_stream_accounts_nothing() {
        let harness = test_accountant(100).await;
        let tracker = TaskTracker::new();

        let tracking = UsageTrackingStream::new(
            stream::iter(chunks("data: garbage\n\n: ping\n\n", 4)),
            harness.accountant.clone(),
            "claude-sonnet-4-5".into(),
            tracker.clone(),
        );
        let _: Vec<_> = tracking.collect().await;

        settle(&tracker).await;
        let cycle = BillingCycle::current(1);
        assert_eq!(harness.db.usage().count_records(&cycle).await.unwrap(), 0);
    }
}
