use model::{
    core::identifiers::MediaGroupKey,
    records::{
        message::Message,
        unit::{DispatchUnit, MediaGroup},
    },
};
use std::collections::HashMap;

/// A batch split into whole media groups and standalone messages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assembled {
    /// In order of each key's first appearance in the batch.
    pub groups: Vec<MediaGroup>,
    pub standalone: Vec<Message>,
}

impl Assembled {
    /// Dispatch order: ascending by the first source id of each unit.
    pub fn into_units(self) -> Vec<DispatchUnit> {
        let mut units: Vec<DispatchUnit> = self
            .groups
            .into_iter()
            .map(DispatchUnit::Group)
            .chain(self.standalone.into_iter().map(DispatchUnit::Single))
            .collect();
        units.sort_by_key(|u| u.first_id());
        units
    }
}

/// Groups messages by media-group key. Items inside a group keep ascending
/// id order whatever the input order.
pub fn assemble(batch: Vec<Message>) -> Assembled {
    let mut groups: Vec<MediaGroup> = Vec::new();
    let mut index: HashMap<MediaGroupKey, usize> = HashMap::new();
    let mut standalone = Vec::new();

    for msg in batch {
        match msg.media_group.clone() {
            Some(key) => {
                let slot = *index.entry(key.clone()).or_insert_with(|| {
                    groups.push(MediaGroup {
                        key,
                        items: Vec::new(),
                    });
                    groups.len() - 1
                });
                groups[slot].items.push(msg);
            }
            None => standalone.push(msg),
        }
    }

    for group in &mut groups {
        group.items.sort_by_key(|m| m.id);
    }
    standalone.sort_by_key(|m| m.id);

    Assembled { groups, standalone }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: i64) -> Message {
        Message::text("src", id, format!("m{id}"))
    }

    #[test]
    fn separates_groups_from_standalone() {
        let batch = vec![
            msg(1),
            msg(2).in_group("a"),
            msg(3).in_group("a"),
            msg(4),
            msg(5).in_group("b"),
        ];
        let out = assemble(batch);

        assert_eq!(out.groups.len(), 2);
        assert_eq!(out.groups[0].key.as_str(), "a");
        assert_eq!(out.groups[0].len(), 2);
        assert_eq!(out.standalone.len(), 2);
    }

    #[test]
    fn groups_follow_first_seen_position() {
        let batch = vec![msg(9).in_group("late"), msg(3).in_group("early"), msg(8).in_group("late")];
        let out = assemble(batch);

        let keys: Vec<_> = out.groups.iter().map(|g| g.key.to_string()).collect();
        assert_eq!(keys, vec!["late", "early"]);
        let late: Vec<_> = out.groups[0].items.iter().map(|m| m.id).collect();
        assert_eq!(late, vec![8, 9]);
    }

    #[test]
    fn units_interleave_by_first_id() {
        let batch = vec![
            msg(1),
            msg(2).in_group("g"),
            msg(3).in_group("g"),
            msg(4),
        ];
        let firsts: Vec<_> = assemble(batch)
            .into_units()
            .iter()
            .map(|u| (u.first_id(), u.len()))
            .collect();
        assert_eq!(firsts, vec![(1, 1), (2, 2), (4, 1)]);
    }

    #[test]
    fn empty_batch_gives_nothing() {
        assert_eq!(assemble(Vec::new()), Assembled::default());
    }
}
