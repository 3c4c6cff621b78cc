use engine_config::settings::transform::TransformSettings;
use model::records::{
    content::{GroupContent, Outgoing, TransformOutcome},
    message::Message,
    unit::MediaGroup,
};

/// Content-transform stage. Pure: no I/O and no shared mutable state.
pub trait ContentTransform: Send + Sync {
    fn transform(&self, msg: &Message, settings: &TransformSettings) -> TransformOutcome<Outgoing>;

    fn transform_group(
        &self,
        group: &MediaGroup,
        settings: &TransformSettings,
    ) -> TransformOutcome<GroupContent>;
}
