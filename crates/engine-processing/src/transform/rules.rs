use crate::transform::pipeline::{TextPipeline, TextPipelineExt, TextRule};
use engine_config::settings::transform::TransformSettings;
use engine_core::transform::ContentTransform;
use model::records::{
    content::{GroupContent, Outgoing, TransformOutcome},
    message::Message,
    unit::MediaGroup,
};
use std::collections::BTreeMap;

const LINK_PREFIXES: [&str; 5] = ["http://", "https://", "www.", "t.me/", "tg://"];

pub struct ReplaceWords(BTreeMap<String, String>);

impl TextRule for ReplaceWords {
    fn apply(&self, text: &str) -> String {
        self.0
            .iter()
            .filter(|(from, _)| !from.is_empty())
            .fold(text.to_string(), |acc, (from, to)| acc.replace(from.as_str(), to))
    }
}

pub struct StripLinks;

impl TextRule for StripLinks {
    fn apply(&self, text: &str) -> String {
        text.lines()
            .map(|line| {
                line.split(' ')
                    .filter(|token| !is_link(token))
                    .collect::<Vec<_>>()
                    .join(" ")
                    .trim_end()
                    .to_string()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn is_link(token: &str) -> bool {
    let lower = token.to_lowercase();
    LINK_PREFIXES.iter().any(|p| lower.starts_with(p))
}

pub struct AppendTail(String);

impl TextRule for AppendTail {
    fn apply(&self, text: &str) -> String {
        if text.trim().is_empty() {
            return text.to_string();
        }
        format!("{}\n\n{}", text.trim_end(), self.0)
    }
}

/// Keyword filter, word replacement, link stripping, tail text and extra
/// buttons, driven by [`TransformSettings`].
pub struct RuleTransform {
    caption_limit: usize,
}

impl RuleTransform {
    pub fn new(caption_limit: usize) -> Self {
        Self { caption_limit }
    }

    fn pipeline(settings: &TransformSettings) -> TextPipeline {
        TextPipeline::new()
            .add_if(!settings.replacements.is_empty(), || {
                ReplaceWords(settings.replacements.clone())
            })
            .add_if(settings.remove_links, || StripLinks)
            .add_if(settings.tail_text.is_some(), || {
                AppendTail(settings.tail_text.clone().unwrap_or_default())
            })
    }

    fn is_filtered(text: &str, settings: &TransformSettings) -> bool {
        if settings.filter_keywords.is_empty() {
            return false;
        }
        let lower = text.to_lowercase();
        settings
            .filter_keywords
            .iter()
            .filter(|kw| !kw.trim().is_empty())
            .any(|kw| lower.contains(&kw.to_lowercase()))
    }
}

fn non_blank(text: String) -> Option<String> {
    (!text.trim().is_empty()).then_some(text)
}

fn truncate_chars(text: String, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text,
    }
}

impl ContentTransform for RuleTransform {
    fn transform(&self, msg: &Message, settings: &TransformSettings) -> TransformOutcome<Outgoing> {
        let original = msg.text.clone().unwrap_or_default();
        if Self::is_filtered(&original, settings) {
            return TransformOutcome::skip(Outgoing::from_message(msg));
        }

        let mut buttons = msg.buttons.clone();
        buttons.extend(settings.buttons.iter().cloned());

        TransformOutcome::send(Outgoing {
            text: non_blank(Self::pipeline(settings).apply(&original)),
            media: msg.media.clone(),
            buttons,
        })
    }

    fn transform_group(
        &self,
        group: &MediaGroup,
        settings: &TransformSettings,
    ) -> TransformOutcome<GroupContent> {
        let merged = group
            .items
            .iter()
            .filter_map(|m| m.text.as_deref())
            .filter(|t| !t.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        let media = group.items.iter().filter_map(|m| m.media.clone()).collect();

        if Self::is_filtered(&merged, settings) {
            return TransformOutcome::skip(GroupContent {
                caption: non_blank(merged),
                media,
                buttons: Vec::new(),
            });
        }

        let caption = truncate_chars(Self::pipeline(settings).apply(&merged), self.caption_limit);
        TransformOutcome::send(GroupContent {
            caption: non_blank(caption),
            media,
            buttons: settings.buttons.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::records::message::{Button, Media, MediaKind};

    fn settings() -> TransformSettings {
        let mut s = TransformSettings {
            remove_links: true,
            tail_text: Some("via @mirror".into()),
            ..Default::default()
        };
        s.replacements.insert("cat".into(), "dog".into());
        s
    }

    #[test]
    fn rewrites_text_in_order() {
        let msg = Message::text("src", 1, "my cat https://x.y/z is cute");
        let out = RuleTransform::new(1024).transform(&msg, &settings());

        assert!(!out.skip);
        assert_eq!(
            out.content.text.as_deref(),
            Some("my dog is cute\n\nvia @mirror")
        );
    }

    #[test]
    fn link_only_message_becomes_empty() {
        let msg = Message::text("src", 1, "https://only.link");
        let settings = TransformSettings {
            remove_links: true,
            ..Default::default()
        };
        let out = RuleTransform::new(1024).transform(&msg, &settings);
        assert!(out.content.is_empty());
    }

    #[test]
    fn extra_buttons_are_appended() {
        let msg = Message::text("src", 1, "hello");
        let settings = TransformSettings {
            buttons: vec![Button {
                label: "Join".into(),
                url: "https://t.me/x".into(),
            }],
            ..Default::default()
        };
        let out = RuleTransform::new(1024).transform(&msg, &settings);
        assert_eq!(out.content.buttons.len(), 1);
    }

    #[test]
    fn group_caption_is_merged_and_truncated() {
        let items = (1..=3)
            .map(|id| {
                Message::text("src", id, "x".repeat(600))
                    .with_media(Media::new(MediaKind::Photo, format!("p{id}")))
                    .in_group("g")
            })
            .collect();
        let group = MediaGroup {
            key: "g".into(),
            items,
        };

        let out = RuleTransform::new(1024).transform_group(&group, &TransformSettings::default());
        assert_eq!(out.content.media.len(), 3);
        assert_eq!(out.content.caption.unwrap().chars().count(), 1024);
    }

    #[test]
    fn keyword_in_any_group_item_skips_whole_group() {
        let group = MediaGroup {
            key: "g".into(),
            items: vec![
                Message::text("src", 1, "nice").in_group("g"),
                Message::text("src", 2, "Buy NOW").in_group("g"),
            ],
        };
        let settings = TransformSettings {
            filter_keywords: vec!["buy now".into()],
            ..Default::default()
        };
        assert!(RuleTransform::new(1024).transform_group(&group, &settings).skip);
    }
}
