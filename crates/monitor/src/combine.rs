//! Combine-latest over three labelled live sources.
//!
//! The combinator keeps the most recent value of every source and emits a
//! fresh tuple whenever any one of them updates, but only after all three
//! have produced at least one value. A source that fails or closes ends the
//! combined sequence with that failure.

use chain_guardian_domain::SourceError;
use futures_util::stream::{self, StreamExt};

use crate::context::LiveStream;

#[derive(Debug, Clone, PartialEq)]
pub enum Update<A, B, C> {
    First(A),
    Second(B),
    Third(C),
}

/// Latest value per source.
#[derive(Debug, Clone, PartialEq)]
pub struct Latest<A, B, C> {
    first: Option<A>,
    second: Option<B>,
    third: Option<C>,
}

impl<A, B, C> Default for Latest<A, B, C> {
    fn default() -> Self {
        Self {
            first: None,
            second: None,
            third: None,
        }
    }
}

impl<A: Clone, B: Clone, C: Clone> Latest<A, B, C> {
    /// Records the update and returns the full tuple once every slot is set.
    pub fn apply(&mut self, update: Update<A, B, C>) -> Option<(A, B, C)> {
        match update {
            Update::First(value) => self.first = Some(value),
            Update::Second(value) => self.second = Some(value),
            Update::Third(value) => self.third = Some(value),
        }
        match (&self.first, &self.second, &self.third) {
            (Some(a), Some(b), Some(c)) => Some((a.clone(), b.clone(), c.clone())),
            _ => None,
        }
    }
}

/// Ends `source` with `SourceError::Closed(label)` if it finishes without
/// failing. Items after the first failure are never polled.
pub fn close_as_failure<T: Send + 'static>(label: &str, source: LiveStream<T>) -> LiveStream<T> {
    let label = label.to_string();
    stream::unfold(Some(source), move |state| {
        let label = label.clone();
        async move {
            let mut source = state?;
            match source.next().await {
                Some(Ok(value)) => Some((Ok(value), Some(source))),
                Some(Err(err)) => Some((Err(err), None)),
                None => Some((Err(SourceError::Closed(label)), None)),
            }
        }
    })
    .boxed()
}

pub fn combine_latest3<A, B, C>(
    first: (&str, LiveStream<A>),
    second: (&str, LiveStream<B>),
    third: (&str, LiveStream<C>),
) -> LiveStream<(A, B, C)>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    C: Clone + Send + 'static,
{
    let first = close_as_failure(first.0, first.1)
        .map(|item| item.map(Update::<A, B, C>::First))
        .boxed();
    let second = close_as_failure(second.0, second.1)
        .map(|item| item.map(Update::<A, B, C>::Second))
        .boxed();
    let third = close_as_failure(third.0, third.1)
        .map(|item| item.map(Update::<A, B, C>::Third))
        .boxed();
    let merged = stream::select(stream::select(first, second), third).boxed();

    stream::unfold(Some((merged, Latest::default())), |state| async move {
        let (mut merged, mut latest) = state?;
        loop {
            match merged.next().await? {
                Ok(update) => {
                    if let Some(values) = latest.apply(update) {
                        return Some((Ok(values), Some((merged, latest))));
                    }
                }
                Err(err) => return Some((Err(err), None)),
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Feed;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn latest_waits_for_every_slot() {
        let mut latest = Latest::<u8, u8, u8>::default();
        assert_eq!(latest.apply(Update::First(1)), None);
        assert_eq!(latest.apply(Update::Third(3)), None);
        assert_eq!(latest.apply(Update::Second(2)), Some((1, 2, 3)));
        assert_eq!(latest.apply(Update::First(9)), Some((9, 2, 3)));
    }

    #[tokio::test]
    async fn recombines_on_every_update_after_all_ready() {
        let a = Feed::<u32>::default();
        let b = Feed::<u32>::default();
        let c = Feed::<u32>::default();
        let mut combined =
            combine_latest3(("a", a.subscribe("k")), ("b", b.subscribe("k")), ("c", c.subscribe("k")));

        a.push("k", 1);
        b.push("k", 2);
        assert!(timeout(Duration::from_millis(30), combined.next()).await.is_err());

        c.push("k", 3);
        assert_eq!(combined.next().await, Some(Ok((1, 2, 3))));

        b.push("k", 20);
        assert_eq!(combined.next().await, Some(Ok((1, 20, 3))));
        c.push("k", 30);
        assert_eq!(combined.next().await, Some(Ok((1, 20, 30))));
    }

    #[tokio::test]
    async fn failure_of_one_source_ends_the_sequence() {
        let a = Feed::<u32>::default();
        let b = Feed::<u32>::default();
        let c = Feed::<u32>::default();
        let mut combined =
            combine_latest3(("a", a.subscribe("k")), ("b", b.subscribe("k")), ("c", c.subscribe("k")));

        b.fail("k", SourceError::Rpc("boom".into()));
        assert_eq!(combined.next().await, Some(Err(SourceError::Rpc("boom".into()))));
        assert_eq!(combined.next().await, None);
    }

    #[tokio::test]
    async fn closing_a_source_is_reported_with_its_label() {
        let source = stream::iter(vec![Ok(1_u32)]).boxed();
        let mut guarded = close_as_failure("price", source);
        assert_eq!(guarded.next().await, Some(Ok(1)));
        assert_eq!(
            guarded.next().await,
            Some(Err(SourceError::Closed("price".into())))
        );
        assert_eq!(guarded.next().await, None);
    }
}
