use crate::{dispatch::Dispatcher, error::DispatchError};
use engine_config::settings::transform::TransformSettings;
use engine_core::{metrics::Metrics, transform::ContentTransform};
use model::{core::identifiers::StreamId, records::unit::DispatchUnit};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// How one dispatch unit was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Sent { items: usize },
    /// Filtered out by the transform stage.
    Skipped,
    /// Nothing left to send after transformation.
    Empty,
    Failed { reason: String },
    /// Stop requested before the unit was resolved.
    Cancelled,
}

impl UnitOutcome {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, UnitOutcome::Cancelled)
    }
}

/// Transform then dispatch, shared by backfill and tailing.
pub struct UnitProcessor {
    transform: Arc<dyn ContentTransform>,
    dispatcher: Arc<Dispatcher>,
    metrics: Metrics,
}

impl UnitProcessor {
    pub fn new(
        transform: Arc<dyn ContentTransform>,
        dispatcher: Arc<Dispatcher>,
        metrics: Metrics,
    ) -> Self {
        Self {
            transform,
            dispatcher,
            metrics,
        }
    }

    pub async fn process(
        &self,
        unit: &DispatchUnit,
        target: &StreamId,
        settings: &TransformSettings,
        cancel: &CancellationToken,
    ) -> UnitOutcome {
        let result = match unit {
            DispatchUnit::Single(msg) => {
                let outcome = self.transform.transform(msg, settings);
                if outcome.skip {
                    self.metrics.increment_skipped();
                    return UnitOutcome::Skipped;
                }
                if outcome.content.is_empty() {
                    return UnitOutcome::Empty;
                }
                self.dispatcher
                    .send_item(target, &outcome.content, cancel)
                    .await
            }
            DispatchUnit::Group(group) => {
                let outcome = self.transform.transform_group(group, settings);
                if outcome.skip {
                    self.metrics.increment_skipped();
                    return UnitOutcome::Skipped;
                }
                if outcome.content.is_empty() {
                    return UnitOutcome::Empty;
                }
                self.dispatcher
                    .send_group(target, &outcome.content, cancel)
                    .await
            }
        };

        match result {
            Ok(_) => {
                self.metrics.record_sent(unit.len() as u64);
                UnitOutcome::Sent { items: unit.len() }
            }
            Err(DispatchError::Cancelled) => UnitOutcome::Cancelled,
            Err(err) => {
                self.metrics.increment_failures();
                warn!(
                    first_id = unit.first_id(),
                    last_id = unit.last_id(),
                    items = unit.len(),
                    error = %err,
                    "Unit failed"
                );
                UnitOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        testing::{MockTransport, Sent},
        transform::rules::RuleTransform,
    };
    use engine_config::settings::{DispatchConfig, RateConfig};
    use engine_core::{error::TransportError, event_bus::bus::EventBus, rate::RateController};
    use model::records::{
        message::{Media, MediaKind, Message},
        unit::MediaGroup,
    };

    fn processor(t: Arc<MockTransport>) -> UnitProcessor {
        let metrics = Metrics::new();
        let dispatcher = Dispatcher::new(
            t,
            Arc::new(RateController::new(&RateConfig::default())),
            &DispatchConfig::default(),
            metrics.clone(),
            EventBus::new(),
        );
        UnitProcessor::new(
            Arc::new(RuleTransform::new(1024)),
            Arc::new(dispatcher),
            metrics,
        )
    }

    fn group(ids: &[i64]) -> DispatchUnit {
        DispatchUnit::Group(MediaGroup {
            key: "g".into(),
            items: ids
                .iter()
                .map(|id| {
                    Message::text("src", *id, "")
                        .with_media(Media::new(MediaKind::Photo, format!("p{id}")))
                        .in_group("g")
                })
                .collect(),
        })
    }

    #[tokio::test]
    async fn group_travels_in_one_send() {
        let t = Arc::new(MockTransport::default());
        let outcome = processor(t.clone())
            .process(
                &group(&[1, 2, 3]),
                &"dst".into(),
                &TransformSettings::default(),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome, UnitOutcome::Sent { items: 3 });
        assert_eq!(t.sent(), vec![Sent::Group(3)]);
    }

    #[tokio::test]
    async fn keyword_filter_skips_without_sending() {
        let t = Arc::new(MockTransport::default());
        let settings = TransformSettings {
            filter_keywords: vec!["promo".into()],
            ..Default::default()
        };
        let unit = DispatchUnit::Single(Message::text("src", 1, "big PROMO today"));

        let outcome = processor(t.clone())
            .process(&unit, &"dst".into(), &settings, &CancellationToken::new())
            .await;
        assert_eq!(outcome, UnitOutcome::Skipped);
        assert!(t.sent().is_empty());
    }

    #[tokio::test]
    async fn blank_text_is_empty_not_failed() {
        let t = Arc::new(MockTransport::default());
        let unit = DispatchUnit::Single(Message::text("src", 1, "   "));

        let outcome = processor(t.clone())
            .process(
                &unit,
                &"dst".into(),
                &TransformSettings::default(),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(outcome, UnitOutcome::Empty);
    }

    #[tokio::test]
    async fn rejected_group_fails_as_a_whole() {
        let t = Arc::new(MockTransport::default());
        t.send_errors
            .lock()
            .unwrap()
            .push_back(TransportError::Permanent("media invalid".into()));

        let outcome = processor(t.clone())
            .process(
                &group(&[5, 6]),
                &"dst".into(),
                &TransformSettings::default(),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(outcome, UnitOutcome::Failed { .. }));
        assert!(t.sent().is_empty());
    }
}
