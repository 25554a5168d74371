//! Event store abstraction and an in-memory implementation.
//!
//! The store is an append-only log of [`GoalEvent`]s and [`GoalSetRecord`]s
//! with pageable queries. Nothing here decides which event is authoritative;
//! that is the job of [`reconcile`](crate::reconcile).

use std::collections::HashMap;

use async_trait::async_trait;
use goalflow_types::{GoalEvent, GoalSetRecord, GoalSetState, GoalState, Result};

use crate::events::{EventBus, StoreEvent};

// ---------------------------------------------------------------------------
// Paging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

impl PageRequest {
    pub fn first(limit: usize) -> Self {
        Self { offset: 0, limit }
    }
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Request for the following page, if there is one.
    pub next: Option<PageRequest>,
}

fn paginate<T>(items: Vec<T>, page: PageRequest) -> Page<T> {
    let total = items.len();
    let end = page.offset.saturating_add(page.limit).min(total);
    let items: Vec<T> = items
        .into_iter()
        .skip(page.offset)
        .take(page.limit)
        .collect();
    let next = (end < total && page.limit > 0).then(|| PageRequest {
        offset: end,
        limit: page.limit,
    });
    Page { items, next }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct GoalEventFilter {
    pub goal_set_id: Option<String>,
    pub unique_name: Option<String>,
    /// Empty means any state.
    pub states: Vec<GoalState>,
}

impl GoalEventFilter {
    pub fn for_goal_set(goal_set_id: impl Into<String>) -> Self {
        Self {
            goal_set_id: Some(goal_set_id.into()),
            ..Self::default()
        }
    }

    pub fn with_unique_name(mut self, unique_name: impl Into<String>) -> Self {
        self.unique_name = Some(unique_name.into());
        self
    }

    pub fn with_states(mut self, states: Vec<GoalState>) -> Self {
        self.states = states;
        self
    }

    pub fn matches(&self, event: &GoalEvent) -> bool {
        self.goal_set_id
            .as_deref()
            .map_or(true, |id| id == event.goal_set_id)
            && self
                .unique_name
                .as_deref()
                .map_or(true, |name| name == event.unique_name)
            && (self.states.is_empty() || self.states.contains(&event.state))
    }
}

#[derive(Debug, Clone, Default)]
pub struct GoalSetFilter {
    pub goal_set_id: Option<String>,
    pub registration: Option<String>,
    pub state: Option<GoalSetState>,
}

impl GoalSetFilter {
    pub fn in_process_for(registration: impl Into<String>) -> Self {
        Self {
            goal_set_id: None,
            registration: Some(registration.into()),
            state: Some(GoalSetState::InProcess),
        }
    }

    pub fn by_id(goal_set_id: impl Into<String>) -> Self {
        Self {
            goal_set_id: Some(goal_set_id.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &GoalSetRecord) -> bool {
        self.goal_set_id
            .as_deref()
            .map_or(true, |id| id == record.goal_set_id)
            && self
                .registration
                .as_deref()
                .map_or(true, |r| r == record.registration)
            && self.state.map_or(true, |s| s == record.state)
    }
}

// ---------------------------------------------------------------------------
// GoalEventStore trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait GoalEventStore: Send + Sync {
    async fn append(&self, event: GoalEvent) -> Result<()>;

    /// Matching events in arrival order.
    async fn query(&self, filter: &GoalEventFilter, page: PageRequest) -> Result<Page<GoalEvent>>;

    async fn append_goal_set(&self, record: GoalSetRecord) -> Result<()>;

    /// The latest record of each matching goal-set, ordered by the arrival of
    /// that goal-set's first record.
    async fn query_goal_sets(
        &self,
        filter: &GoalSetFilter,
        page: PageRequest,
    ) -> Result<Page<GoalSetRecord>>;
}

/// Follow `next` until every page matching `filter` has been read.
pub async fn fetch_all_events(
    store: &dyn GoalEventStore,
    filter: &GoalEventFilter,
    page_size: usize,
) -> Result<Vec<GoalEvent>> {
    let mut all = Vec::new();
    let mut page = Some(PageRequest::first(page_size.max(1)));
    while let Some(request) = page {
        let result = store.query(filter, request).await?;
        all.extend(result.items);
        page = result.next;
    }
    Ok(all)
}

pub async fn fetch_goal_set_events(
    store: &dyn GoalEventStore,
    goal_set_id: &str,
    page_size: usize,
) -> Result<Vec<GoalEvent>> {
    fetch_all_events(store, &GoalEventFilter::for_goal_set(goal_set_id), page_size).await
}

pub async fn latest_goal_set(
    store: &dyn GoalEventStore,
    goal_set_id: &str,
) -> Result<Option<GoalSetRecord>> {
    let page = store
        .query_goal_sets(&GoalSetFilter::by_id(goal_set_id), PageRequest::first(1))
        .await?;
    Ok(page.items.into_iter().next())
}

// ---------------------------------------------------------------------------
// InMemoryGoalEventStore
// ---------------------------------------------------------------------------

/// Append-only store held in memory, optionally publishing appends to an
/// [`EventBus`].
#[derive(Default)]
pub struct InMemoryGoalEventStore {
    events: tokio::sync::RwLock<Vec<GoalEvent>>,
    goal_sets: tokio::sync::RwLock<Vec<GoalSetRecord>>,
    bus: Option<EventBus>,
}

impl InMemoryGoalEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bus(bus: EventBus) -> Self {
        Self {
            bus: Some(bus),
            ..Self::default()
        }
    }

    /// Every appended event, in arrival order.
    pub async fn all_events(&self) -> Vec<GoalEvent> {
        self.events.read().await.clone()
    }

    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }
}

#[async_trait]
impl GoalEventStore for InMemoryGoalEventStore {
    async fn append(&self, event: GoalEvent) -> Result<()> {
        self.events.write().await.push(event.clone());
        if let Some(bus) = &self.bus {
            bus.publish(StoreEvent::Goal(event));
        }
        Ok(())
    }

    async fn query(&self, filter: &GoalEventFilter, page: PageRequest) -> Result<Page<GoalEvent>> {
        let matching: Vec<GoalEvent> = self
            .events
            .read()
            .await
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        Ok(paginate(matching, page))
    }

    async fn append_goal_set(&self, record: GoalSetRecord) -> Result<()> {
        self.goal_sets.write().await.push(record.clone());
        if let Some(bus) = &self.bus {
            bus.publish(StoreEvent::GoalSet(record));
        }
        Ok(())
    }

    async fn query_goal_sets(
        &self,
        filter: &GoalSetFilter,
        page: PageRequest,
    ) -> Result<Page<GoalSetRecord>> {
        let log = self.goal_sets.read().await;
        let mut latest: Vec<GoalSetRecord> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();
        for record in log.iter() {
            match index.get(record.goal_set_id.as_str()) {
                Some(&i) => {
                    if record.ts >= latest[i].ts {
                        latest[i] = record.clone();
                    }
                }
                None => {
                    index.insert(record.goal_set_id.as_str(), latest.len());
                    latest.push(record.clone());
                }
            }
        }
        let matching: Vec<GoalSetRecord> =
            latest.into_iter().filter(|r| filter.matches(r)).collect();
        Ok(paginate(matching, page))
    }
}
