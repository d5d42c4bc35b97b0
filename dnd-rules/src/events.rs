//! Typed publish/subscribe for combat state transitions.
//!
//! The engine and the spellcasting resolver share one [`EventBus`] handle.
//! Collaborators subscribe by [`EventKind`], either with a callback or with
//! a tokio channel when they consume events from async code.

use crate::actions::DamageType;
use crate::combatant::CombatantId;
use crate::conditions::ConditionChange;
use crate::encounter::{EncounterId, EncounterOutcome};
use crate::resolver::AttackResult;
use crate::spells::SpellId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::trace;

/// Which rest recovered spell slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestKind {
    Short,
    Long,
}

/// Why a concentration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConcentrationEnd {
    /// Replaced by a new concentration spell.
    Replaced,
    /// Failed a concentration save.
    Broken,
    /// The caster dropped to 0 HP.
    Incapacitated,
    /// Ended on purpose by the caster.
    Dropped,
    /// The spell's duration ran out, or nothing it sustained is left.
    Expired,
}

/// Everything an encounter can announce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CombatEvent {
    CombatStart {
        name: String,
        combatants: Vec<CombatantId>,
    },
    CombatEnd {
        outcome: EncounterOutcome,
        rounds: u32,
    },
    RoundStart {
        round: u32,
    },
    RoundEnd {
        round: u32,
    },
    TurnStart {
        round: u32,
        combatant: CombatantId,
    },
    TurnEnd {
        round: u32,
        combatant: CombatantId,
    },
    DamageDealt {
        source: Option<CombatantId>,
        target: CombatantId,
        amount: i32,
        damage_types: Vec<DamageType>,
        critical: bool,
        hp_after: i32,
    },
    Healed {
        source: Option<CombatantId>,
        target: CombatantId,
        amount: i32,
        hp_after: i32,
    },
    ConditionApplied {
        target: CombatantId,
        condition: String,
    },
    ConditionRemoved {
        target: CombatantId,
        condition: String,
    },
    SpellCast {
        caster: CombatantId,
        spell: SpellId,
        level: u8,
        targets: Vec<CombatantId>,
    },
    ConcentrationStarted {
        caster: CombatantId,
        spell: SpellId,
    },
    ConcentrationEnded {
        caster: CombatantId,
        spell: SpellId,
        reason: ConcentrationEnd,
    },
    SlotsRecovered {
        caster: CombatantId,
        rest: RestKind,
    },
}

/// Subscription key mirroring [`CombatEvent`]'s variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    CombatStart,
    CombatEnd,
    RoundStart,
    RoundEnd,
    TurnStart,
    TurnEnd,
    DamageDealt,
    Healed,
    ConditionApplied,
    ConditionRemoved,
    SpellCast,
    ConcentrationStarted,
    ConcentrationEnded,
    SlotsRecovered,
}

impl CombatEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            CombatEvent::CombatStart { .. } => EventKind::CombatStart,
            CombatEvent::CombatEnd { .. } => EventKind::CombatEnd,
            CombatEvent::RoundStart { .. } => EventKind::RoundStart,
            CombatEvent::RoundEnd { .. } => EventKind::RoundEnd,
            CombatEvent::TurnStart { .. } => EventKind::TurnStart,
            CombatEvent::TurnEnd { .. } => EventKind::TurnEnd,
            CombatEvent::DamageDealt { .. } => EventKind::DamageDealt,
            CombatEvent::Healed { .. } => EventKind::Healed,
            CombatEvent::ConditionApplied { .. } => EventKind::ConditionApplied,
            CombatEvent::ConditionRemoved { .. } => EventKind::ConditionRemoved,
            CombatEvent::SpellCast { .. } => EventKind::SpellCast,
            CombatEvent::ConcentrationStarted { .. } => EventKind::ConcentrationStarted,
            CombatEvent::ConcentrationEnded { .. } => EventKind::ConcentrationEnded,
            CombatEvent::SlotsRecovered { .. } => EventKind::SlotsRecovered,
        }
    }
}

/// An event plus when and where it happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    /// `None` for events outside an encounter (resting, for instance).
    pub encounter_id: Option<EncounterId>,
    pub event: CombatEvent,
}

impl EventRecord {
    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }
}

/// Handle returned by the subscribe calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&EventRecord) + Send + Sync>;

enum Sink {
    Handler(Handler),
    Channel(mpsc::UnboundedSender<EventRecord>),
}

struct Subscription {
    id: SubscriptionId,
    /// `None` receives every kind.
    kinds: Option<Vec<EventKind>>,
    sink: Sink,
}

impl Subscription {
    fn wants(&self, kind: EventKind) -> bool {
        match &self.kinds {
            None => true,
            Some(kinds) => kinds.contains(&kind),
        }
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscriptions: Vec<Subscription>,
}

/// Cloneable publish/subscribe handle.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // Handlers never run under the lock
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, kinds: Option<Vec<EventKind>>, sink: Sink) -> SubscriptionId {
        let mut registry = self.registry();
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry.subscriptions.push(Subscription { id, kinds, sink });
        id
    }

    /// Call `handler` for every event of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&EventRecord) + Send + Sync + 'static,
    {
        self.register(Some(vec![kind]), Sink::Handler(Arc::new(handler)))
    }

    /// Call `handler` for every event.
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&EventRecord) + Send + Sync + 'static,
    {
        self.register(None, Sink::Handler(Arc::new(handler)))
    }

    /// Stream events of the given kinds (all kinds when empty) into a channel.
    ///
    /// The subscription is dropped once the receiver is.
    pub fn channel(&self, kinds: &[EventKind]) -> mpsc::UnboundedReceiver<EventRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        let kinds = if kinds.is_empty() {
            None
        } else {
            Some(kinds.to_vec())
        };
        self.register(kinds, Sink::Channel(tx));
        rx
    }

    /// Returns false if the id was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry();
        let before = registry.subscriptions.len();
        registry.subscriptions.retain(|s| s.id != id);
        registry.subscriptions.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry().subscriptions.len()
    }

    /// Stamp and deliver an event. Returns the delivered record.
    pub fn publish(&self, encounter_id: Option<EncounterId>, event: CombatEvent) -> EventRecord {
        let record = EventRecord {
            timestamp: Utc::now(),
            encounter_id,
            event,
        };
        let kind = record.kind();

        let handlers: Vec<Handler> = {
            let mut registry = self.registry();
            registry.subscriptions.retain(|s| match &s.sink {
                Sink::Channel(tx) => !tx.is_closed(),
                Sink::Handler(_) => true,
            });
            registry
                .subscriptions
                .iter()
                .filter(|s| s.wants(kind))
                .filter_map(|s| match &s.sink {
                    Sink::Handler(handler) => Some(Arc::clone(handler)),
                    Sink::Channel(tx) => {
                        // A receiver dropped since the sweep above is pruned on the next publish
                        let _ = tx.send(record.clone());
                        None
                    }
                })
                .collect()
        };

        trace!(?kind, handlers = handlers.len(), "event published");
        for handler in handlers {
            handler(&record);
        }
        record
    }
}

/// Announce what one resolution did to its target.
pub(crate) fn publish_result(
    bus: &EventBus,
    encounter_id: Option<EncounterId>,
    source: Option<CombatantId>,
    result: &AttackResult,
    hp_after: i32,
) {
    let target = result.target_id;
    if result.total_damage > 0 {
        bus.publish(
            encounter_id,
            CombatEvent::DamageDealt {
                source,
                target,
                amount: result.total_damage,
                damage_types: result.damage_by_type.keys().copied().collect(),
                critical: result.critical,
                hp_after,
            },
        );
    }
    if result.healing > 0 {
        bus.publish(
            encounter_id,
            CombatEvent::Healed {
                source,
                target,
                amount: result.healing,
                hp_after,
            },
        );
    }
    publish_condition_changes(bus, encounter_id, target, &result.conditions);
}

pub(crate) fn publish_condition_changes(
    bus: &EventBus,
    encounter_id: Option<EncounterId>,
    target: CombatantId,
    changes: &[ConditionChange],
) {
    for change in changes {
        if let Some(name) = change.applied_name() {
            bus.publish(
                encounter_id,
                CombatEvent::ConditionApplied {
                    target,
                    condition: name.to_string(),
                },
            );
        } else if let Some(name) = change.removed_name() {
            bus.publish(
                encounter_id,
                CombatEvent::ConditionRemoved {
                    target,
                    condition: name.to_string(),
                },
            );
        }
    }
}
