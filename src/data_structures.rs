use crate::stock::QuoteSource;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

// --- Core Records ---

/// A news/article title waiting to be scored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Info {
    pub id: u64,
    pub title: String,
    pub url: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub stock: Option<String>,
}

/// Payload accepted when registering a new info.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NewInfo {
    pub id: Option<u64>,
    pub title: String,
    pub url: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

/// One trading day following an info's date.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tracert {
    pub id: u64,
    pub info_id: u64,
    pub date: NaiveDate,
    pub days: u32,
    pub highest: f64,
    pub lowest: f64,
    pub increase_day: f64,
    /// Empty until an opening price usable as the baseline has been seen.
    pub increase_total: Option<f64>,
    /// Empty on days with no opening price.
    pub amplitude_day: Option<f64>,
}

/// Summary score of the price movement after an info. Shares its id with the info.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Judge {
    pub id: u64,
    pub info_id: u64,
    pub day5: Option<f64>,
    pub day10: Option<f64>,
    pub day20: Option<f64>,
    pub day30: Option<f64>,
    pub increase_days: u32,
    pub increase_total: f64,
    pub score: i32,
}

// --- Store ---

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Store {
    next_info_id: u64,
    next_tracert_id: u64,
    infos: BTreeMap<u64, Info>,
    tracerts: BTreeMap<u64, Vec<Tracert>>,
    judges: BTreeMap<u64, Judge>,
}

pub type SharedStore = Arc<Mutex<Store>>;

// Held for the whole duration of a parse batch
pub type SharedQuotes = Arc<Mutex<Box<dyn QuoteSource>>>;

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(infos: Vec<NewInfo>) -> Self {
        let mut store = Self::new();
        for info in infos {
            store.insert_info(info);
        }
        store
    }

    pub fn insert_info(&mut self, new_info: NewInfo) -> Info {
        self.next_info_id += 1;
        let info = Info {
            id: self.next_info_id,
            title: new_info.title,
            url: new_info.url,
            date: new_info.date,
            stock: None,
        };
        self.infos.insert(info.id, info.clone());
        info
    }

    /// Overwrites a stored info. Returns false if the info no longer exists.
    pub fn update_info(&mut self, info: Info) -> bool {
        match self.infos.get_mut(&info.id) {
            Some(slot) => {
                *slot = info;
                true
            }
            None => false,
        }
    }

    pub fn infos(&self) -> Vec<Info> {
        self.infos.values().cloned().collect()
    }

    pub fn info(&self, id: u64) -> Option<&Info> {
        self.infos.get(&id)
    }

    pub fn remove_info(&mut self, id: u64) -> Option<Info> {
        let removed = self.infos.remove(&id)?;
        self.tracerts.remove(&id);
        self.judges.remove(&id);
        Some(removed)
    }

    /// Drops the info's previous tracerts and stores `tracerts` with fresh ids.
    pub fn replace_tracerts(&mut self, info_id: u64, mut tracerts: Vec<Tracert>) {
        for tracert in tracerts.iter_mut() {
            self.next_tracert_id += 1;
            tracert.id = self.next_tracert_id;
            tracert.info_id = info_id;
        }
        tracerts.sort_by_key(|t| t.days);
        self.tracerts.insert(info_id, tracerts);
    }

    pub fn tracerts_for(&self, info_id: u64) -> &[Tracert] {
        self.tracerts.get(&info_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn upsert_judge(&mut self, judge: Judge) {
        self.judges.insert(judge.info_id, judge);
    }

    /// Stores one evaluation of an info. Nothing is written for an info that
    /// has been removed.
    pub fn record_evaluation(&mut self, info_id: u64, tracerts: Vec<Tracert>, judge: Judge) -> bool {
        if !self.infos.contains_key(&info_id) {
            return false;
        }
        self.replace_tracerts(info_id, tracerts);
        self.upsert_judge(judge);
        true
    }

    pub fn judge_for(&self, info_id: u64) -> Option<&Judge> {
        self.judges.get(&info_id)
    }

    /// Judges ordered best first: score, then total increase, then id.
    pub fn ranking(&self) -> Vec<Judge> {
        let mut judges: Vec<Judge> = self.judges.values().cloned().collect();
        judges.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| b.increase_total.total_cmp(&a.increase_total))
                .then_with(|| a.id.cmp(&b.id))
        });
        judges
    }
}
