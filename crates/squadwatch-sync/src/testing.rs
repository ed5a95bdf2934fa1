//! Test fixtures: a scripted upstream, a recording notifier and payloads.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use squadwatch_core::{NewsPayload, SeasonScores, SquadronInfo};

use crate::Result;
use crate::notify::Notifier;
use crate::upstream::{FetchOutcome, Upstream};

/// A plain live squadron: "Squadron {id}", tag "S{id:03}", 10 members.
pub fn squadron(id: i64) -> SquadronInfo {
    SquadronInfo {
        id,
        name: format!("Squadron {}", id),
        tag: format!("S{:03}", id),
        owner_name: "CMDR Test".to_string(),
        owner_id: "1000".to_string(),
        platform: "PC".to_string(),
        created: "2021-06-01 12:00:00".to_string(),
        created_ts: 1_622_548_800,
        accepting_new_members: true,
        power_id: None,
        power_name: None,
        superpower_id: Some(3),
        superpower_name: Some("Federation".to_string()),
        faction_id: None,
        faction_name: None,
        user_tags: Vec::new(),
        member_count: 10,
        pending_count: 0,
        full: false,
        public_comms: false,
        public_comms_override: false,
        public_comms_available: true,
        scores: SeasonScores::default(),
        motd: String::new(),
    }
}

/// Upstream answering from per-id scripts and recording every call.
///
/// Ids without a script answer 404 for both endpoints.
#[derive(Default)]
pub struct FakeUpstream {
    info: Mutex<HashMap<i64, FetchOutcome<SquadronInfo>>>,
    news: Mutex<HashMap<i64, FetchOutcome<NewsPayload>>>,
    info_calls: Mutex<Vec<i64>>,
    news_calls: Mutex<Vec<i64>>,
    trips: Mutex<HashMap<i64, Arc<AtomicBool>>>,
}

impl FakeUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_info(&self, id: i64, outcome: FetchOutcome<SquadronInfo>) {
        self.info.lock().insert(id, outcome);
    }

    pub fn set_news(&self, id: i64, outcome: FetchOutcome<NewsPayload>) {
        self.news.lock().insert(id, outcome);
    }

    /// Raise `flag` while answering the info request for `id`.
    pub fn trip_on_call(&self, id: i64, flag: Arc<AtomicBool>) {
        self.trips.lock().insert(id, flag);
    }

    pub fn info_calls(&self) -> Vec<i64> {
        self.info_calls.lock().clone()
    }

    pub fn news_calls(&self) -> Vec<i64> {
        self.news_calls.lock().clone()
    }
}

impl Upstream for FakeUpstream {
    async fn fetch_info(&self, squadron_id: i64) -> Result<FetchOutcome<SquadronInfo>> {
        self.info_calls.lock().push(squadron_id);
        if let Some(flag) = self.trips.lock().get(&squadron_id) {
            flag.store(true, Ordering::SeqCst);
        }
        Ok(self
            .info
            .lock()
            .get(&squadron_id)
            .cloned()
            .unwrap_or(FetchOutcome::NotFound))
    }

    async fn fetch_news(&self, squadron_id: i64) -> Result<FetchOutcome<NewsPayload>> {
        self.news_calls.lock().push(squadron_id);
        Ok(self
            .news
            .lock()
            .get(&squadron_id)
            .cloned()
            .unwrap_or(FetchOutcome::NotFound))
    }
}

/// Notifier keeping every accepted message.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str) -> bool {
        self.messages.lock().push(message.to_string());
        true
    }
}
