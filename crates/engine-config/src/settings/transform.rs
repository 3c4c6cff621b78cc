use model::{
    core::identifiers::{OwnerId, StreamId},
    records::message::Button,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Rules applied by the content-transform stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformSettings {
    /// A message containing any of these (case-insensitive) is skipped.
    pub filter_keywords: Vec<String>,
    pub replacements: BTreeMap<String, String>,
    pub remove_links: bool,
    pub tail_text: Option<String>,
    pub buttons: Vec<Button>,
}

impl TransformSettings {
    /// Layers `self` on top of `base`: lists are joined, scalar values of
    /// `self` win when set.
    pub fn merged_over(&self, base: &TransformSettings) -> TransformSettings {
        let mut filter_keywords = base.filter_keywords.clone();
        for kw in &self.filter_keywords {
            if !filter_keywords.contains(kw) {
                filter_keywords.push(kw.clone());
            }
        }

        let mut replacements = base.replacements.clone();
        replacements.extend(
            self.replacements
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        TransformSettings {
            filter_keywords,
            replacements,
            remove_links: self.remove_links || base.remove_links,
            tail_text: self.tail_text.clone().or_else(|| base.tail_text.clone()),
            buttons: if self.buttons.is_empty() {
                base.buttons.clone()
            } else {
                self.buttons.clone()
            },
        }
    }

    pub fn is_noop(&self) -> bool {
        self == &TransformSettings::default()
    }
}

/// Transform settings at three levels: per source stream, per owner and
/// engine-wide.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformProfiles {
    pub engine: TransformSettings,
    pub owners: HashMap<OwnerId, TransformSettings>,
    pub sources: HashMap<StreamId, TransformSettings>,
}

impl TransformProfiles {
    /// Effective settings: a per-source override replaces the owner default,
    /// and the winner is merged over the engine default.
    pub fn resolve(&self, owner: &OwnerId, source: &StreamId) -> TransformSettings {
        match self.sources.get(source).or_else(|| self.owners.get(owner)) {
            Some(layer) => layer.merged_over(&self.engine),
            None => self.engine.clone(),
        }
    }
}
