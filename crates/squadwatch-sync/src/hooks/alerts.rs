//! Built-in observers alerting on squadrons that carry a watched tag.

use std::fmt::Write as _;
use std::sync::Arc;

use squadwatch_core::{Snapshot, SquadronInfo, TagCatalog, TagDiff};

use super::{ChangeObserver, DeleteObserver};
use crate::Result;
use crate::notify::Notifier;
use crate::store::SnapshotStore;

/// Which squadrons the alerts care about.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// User tag id marking a watched squadron.
    pub tag: i64,
    /// Human-readable name of the tag, used in messages.
    pub label: String,
    /// New squadrons are only announced above this member count.
    pub min_members: i64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            tag: 32,
            label: "russian".to_string(),
            min_members: 5,
        }
    }
}

/// Announces a watched squadron the first time it is seen.
pub struct NewSquadronAlert {
    watch: WatchConfig,
    notifier: Arc<dyn Notifier>,
}

impl NewSquadronAlert {
    pub fn new(watch: WatchConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self { watch, notifier }
    }

    fn message(&self, info: &SquadronInfo) -> String {
        let motd = if info.motd.is_empty() {
            String::new()
        } else {
            format!("`{}`", info.motd)
        };

        format!(
            "New {} squad with more than {} members: {}\n\
             members: {}\n\
             tag: {}\n\
             created: {}\n\
             platform: {}\n\
             owner: {}\n\
             activity:\n    previous season sum: {}\n    current season sum: {}\n\
             motd: {}",
            self.watch.label,
            self.watch.min_members,
            info.name,
            info.member_count,
            info.tag,
            info.created,
            info.platform,
            info.owner_name,
            info.scores.previous_sum(),
            info.scores.current_sum(),
            motd,
        )
    }
}

impl ChangeObserver for NewSquadronAlert {
    fn name(&self) -> &str {
        "new_squadron_alert"
    }

    fn on_insert_or_update(&self, snapshot: &Snapshot, store: &SnapshotStore) -> Result<()> {
        let Some(info) = snapshot.info() else {
            return Ok(());
        };
        if store.snapshot_count(snapshot.squadron_id)? != 1 {
            return Ok(());
        }

        if info.has_tag(self.watch.tag) && info.member_count > self.watch.min_members {
            self.notifier.notify(&self.message(info));
        }
        Ok(())
    }
}

/// Reports what changed between the two latest snapshots of a watched
/// squadron.
pub struct SquadronChangeAlert {
    watch: WatchConfig,
    catalog: Arc<TagCatalog>,
    notifier: Arc<dyn Notifier>,
}

impl SquadronChangeAlert {
    pub fn new(watch: WatchConfig, catalog: Arc<TagCatalog>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            watch,
            catalog,
            notifier,
        }
    }

    /// Describe the changes from `old` to `new`. Empty if nothing relevant
    /// changed or neither side carries the watched tag.
    pub fn describe(&self, old: &SquadronInfo, new: &SquadronInfo) -> String {
        let mut out = String::new();

        match (old.has_tag(self.watch.tag), new.has_tag(self.watch.tag)) {
            (false, false) => return out,
            (true, true) => {}
            (false, true) => {
                let _ = writeln!(out, "Squadron became {}", self.watch.label);
            }
            (true, false) => {
                let _ = writeln!(out, "Squadron stopped being {}", self.watch.label);
            }
        }

        if old.member_count != new.member_count {
            let _ = writeln!(
                out,
                "Members count changed {} -> {}",
                old.member_count, new.member_count
            );
        }

        if old.motd != new.motd {
            let _ = writeln!(
                out,
                "Motd changed, old:\n```\n{}\n```\nnew:\n```\n{}\n```",
                old.motd, new.motd
            );
        }

        if old.owner_name != new.owner_name {
            let _ = writeln!(
                out,
                "Ownership changed: {} -> {}",
                old.owner_name, new.owner_name
            );
        }

        if old.faction_name != new.faction_name {
            let _ = writeln!(
                out,
                "Faction changed: {} -> {}",
                old.faction_name.as_deref().unwrap_or("none"),
                new.faction_name.as_deref().unwrap_or("none")
            );
        }

        let diff = TagDiff::between(&old.user_tags, &new.user_tags);
        if !diff.is_empty() {
            out.push_str("Tags changed:\n");
            out.push_str(&self.catalog.describe_diff(&diff));
        }

        out
    }
}

impl ChangeObserver for SquadronChangeAlert {
    fn name(&self) -> &str {
        "squadron_change_alert"
    }

    fn on_insert_or_update(&self, snapshot: &Snapshot, store: &SnapshotStore) -> Result<()> {
        let history = store.history(snapshot.squadron_id, 2)?;
        let [newest, previous] = history.as_slice() else {
            // First sighting, announced by NewSquadronAlert
            return Ok(());
        };
        let (Some(new), Some(old)) = (newest.info(), previous.info()) else {
            return Ok(());
        };

        let changes = self.describe(old, new);
        if !changes.is_empty() {
            self.notifier.notify(&format!(
                "State changing for `{}`\nplatform: {}\n{}",
                new.name, new.platform, changes
            ));
        }
        Ok(())
    }
}

/// Reports a watched squadron disappearing upstream.
pub struct RemovalAlert {
    watch: WatchConfig,
    notifier: Arc<dyn Notifier>,
}

impl RemovalAlert {
    pub fn new(watch: WatchConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self { watch, notifier }
    }
}

impl DeleteObserver for RemovalAlert {
    fn name(&self) -> &str {
        "removal_alert"
    }

    fn on_before_delete(&self, squadron_id: i64, store: &SnapshotStore) -> Result<()> {
        // Nothing known about the squadron: nothing to report
        let Some(latest) = store.latest(squadron_id)? else {
            return Ok(());
        };
        let Some(info) = latest.info() else {
            return Ok(());
        };

        if info.has_tag(self.watch.tag) {
            self.notifier.notify(&format!(
                "Deleted squad `{}`\nplatform: {}, members: {}, tag: {}",
                info.name, info.platform, info.member_count, info.tag
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingNotifier, squadron};
    use chrono::{TimeZone, Utc};

    const CATALOG: &str = r#"{
        "SquadronTagData": {
            "SquadronTagCollections": [
                {
                    "localisedCollectionName": "Language",
                    "SquadronTags": [
                        {"ServerUniqueId": 32, "LocalisedString": "Russian"}
                    ]
                },
                {
                    "localisedCollectionName": "Play style",
                    "SquadronTags": [
                        {"ServerUniqueId": 1, "LocalisedString": "Casual"},
                        {"ServerUniqueId": 2, "LocalisedString": "Hardcore"}
                    ]
                }
            ]
        }
    }"#;

    fn watched(id: i64, members: i64) -> SquadronInfo {
        let mut info = squadron(id);
        info.user_tags = vec![32, 1];
        info.member_count = members;
        info
    }

    fn change_alert(notifier: &Arc<RecordingNotifier>) -> SquadronChangeAlert {
        SquadronChangeAlert::new(
            WatchConfig::default(),
            Arc::new(TagCatalog::from_json(CATALOG).unwrap()),
            Arc::clone(notifier) as Arc<dyn Notifier>,
        )
    }

    fn at(seconds: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    #[test]
    fn test_new_squadron_announced_once() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let alert = NewSquadronAlert::new(WatchConfig::default(), notifier.clone());

        let first = store.insert_snapshot(&watched(10, 12), at(1)).unwrap();
        alert.on_insert_or_update(&first, &store).unwrap();
        let second = store.insert_snapshot(&watched(10, 12), at(2)).unwrap();
        alert.on_insert_or_update(&second, &store).unwrap();

        let sent = notifier.messages();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("New russian squad with more than 5 members"));
        assert!(sent[0].contains("members: 12"));
    }

    #[test]
    fn test_new_squadron_below_threshold_or_untagged() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let alert = NewSquadronAlert::new(WatchConfig::default(), notifier.clone());

        let small = store.insert_snapshot(&watched(1, 5), at(1)).unwrap();
        alert.on_insert_or_update(&small, &store).unwrap();
        let untagged = store.insert_snapshot(&squadron(2), at(1)).unwrap();
        alert.on_insert_or_update(&untagged, &store).unwrap();

        assert!(notifier.messages().is_empty());
    }

    #[test]
    fn test_unchanged_snapshot_is_silent() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let alert = change_alert(&notifier);

        store.insert_snapshot(&watched(4, 8), at(1)).unwrap();
        let again = store.insert_snapshot(&watched(4, 8), at(2)).unwrap();
        alert.on_insert_or_update(&again, &store).unwrap();

        assert!(notifier.messages().is_empty());
    }

    #[test]
    fn test_change_report() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let alert = change_alert(&notifier);

        store.insert_snapshot(&watched(4, 8), at(1)).unwrap();
        let mut changed = watched(4, 9);
        changed.user_tags = vec![32, 2];
        changed.owner_name = "CMDR New".to_string();
        let latest = store.insert_snapshot(&changed, at(2)).unwrap();
        alert.on_insert_or_update(&latest, &store).unwrap();

        let sent = notifier.messages();
        assert_eq!(sent.len(), 1);
        let message = &sent[0];
        assert!(message.starts_with("State changing for `Squadron 4`"));
        assert!(message.contains("Members count changed 8 -> 9"));
        assert!(message.contains("Ownership changed: CMDR Test -> CMDR New"));
        assert!(message.contains("Added:\n    Play style:\n        Hardcore\n"));
        assert!(message.contains("Removed:\n    Play style:\n        Casual\n"));
        assert!(!message.contains("became"));
    }

    #[test]
    fn test_watched_tag_transitions() {
        let alert = change_alert(&Arc::new(RecordingNotifier::default()));
        let tagged = watched(1, 3);
        let untagged = squadron(1);

        assert!(alert.describe(&untagged, &tagged).starts_with("Squadron became russian\n"));
        assert!(alert.describe(&tagged, &untagged).starts_with("Squadron stopped being russian\n"));
        assert_eq!(alert.describe(&untagged, &untagged), "");
    }

    #[test]
    fn test_motd_and_faction_change() {
        let alert = change_alert(&Arc::new(RecordingNotifier::default()));
        let old = watched(1, 3);
        let mut new = old.clone();
        new.motd = "recruiting".to_string();
        new.faction_name = Some("Federation".to_string());

        let changes = alert.describe(&old, &new);
        assert!(changes.contains("Motd changed, old:\n```\n\n```\nnew:\n```\nrecruiting\n```"));
        assert!(changes.contains("Faction changed: none -> Federation"));
    }

    #[test]
    fn test_removal_of_watched_squadron() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let alert = RemovalAlert::new(WatchConfig::default(), notifier.clone());

        store.insert_snapshot(&watched(70, 9), at(1)).unwrap();
        store.insert_snapshot(&squadron(71), at(1)).unwrap();

        alert.on_before_delete(70, &store).unwrap();
        alert.on_before_delete(71, &store).unwrap();
        alert.on_before_delete(72, &store).unwrap();

        assert_eq!(
            notifier.messages(),
            vec!["Deleted squad `Squadron 70`\nplatform: PC, members: 9, tag: S070".to_string()]
        );
    }
}
