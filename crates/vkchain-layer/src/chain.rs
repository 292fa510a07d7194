//! The validator chain and its three-phase protocol.
//!
//! A validator declares which calls it hooks in [`Validator::intercepts`];
//! the chain keeps, per call, only the validators that hooked it. Running a
//! call with [`ValidatorChain::intercept`]:
//!
//! 1. every Validate hook, in chain order, under the validator's shared lock;
//!    the first veto aborts the call,
//! 2. every pre-call Record hook, under the validator's exclusive lock,
//! 3. the call down,
//! 4. every post-call Record hook, with the outcome.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use vkchain_core::{Recording, ValidatorCell, ValidatorId};

use crate::call::{Call, Vetoable};

/// Which validation feature a validator implements. Declaration order is the
/// canonical chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValidatorKind {
    ThreadSafety,
    ParameterValidation,
    ObjectLifetimes,
    CoreChecks,
    BestPractices,
    GpuAssisted,
    DebugPrintf,
    SyncValidation,
}

impl ValidatorKind {
    pub const ALL: [ValidatorKind; 8] = [
        Self::ThreadSafety,
        Self::ParameterValidation,
        Self::ObjectLifetimes,
        Self::CoreChecks,
        Self::BestPractices,
        Self::GpuAssisted,
        Self::DebugPrintf,
        Self::SyncValidation,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ThreadSafety => "thread_safety",
            Self::ParameterValidation => "parameter_validation",
            Self::ObjectLifetimes => "object_lifetimes",
            Self::CoreChecks => "core_checks",
            Self::BestPractices => "best_practices",
            Self::GpuAssisted => "gpu_assisted",
            Self::DebugPrintf => "debug_printf",
            Self::SyncValidation => "sync_validation",
        }
    }
}

/// Per-call hooks of a validator. Every hook defaults to doing nothing, so a
/// validator implements only what it checks.
pub trait Intercept<C: Call>: Validator {
    /// Read-only checks. Returning `true` vetoes the call.
    fn validate(&self, _args: &C::Args<'_>, _state: &mut C::State) -> bool {
        false
    }

    fn pre_record(
        _validator: &mut Recording<'_, Self>,
        _args: &C::Args<'_>,
        _state: &mut C::State,
    ) {
    }

    fn post_record(
        _validator: &mut Recording<'_, Self>,
        _args: &C::Args<'_>,
        _state: &mut C::State,
        _output: &C::Output,
    ) {
    }
}

pub trait Validator: Sized + Send + Sync + 'static {
    /// Register the calls this validator hooks.
    fn intercepts(hooks: &mut Hooks<'_, Self>);
}

/// Registration handle passed to [`Validator::intercepts`].
pub struct Hooks<'b, V> {
    cell: &'b Arc<ValidatorCell<V>>,
    table: &'b mut CallTable,
}

impl<V: Validator> Hooks<'_, V> {
    pub fn on<C: Call>(&mut self) -> &mut Self
    where
        V: Intercept<C>,
    {
        self.table.push::<C>(Box::new(Hooked(Arc::clone(self.cell))));
        self
    }
}

// ── Call table ──────────────────────────────────────────────

/// One validator's hooks for call `C`, with the lock taken per phase.
trait Link<C: Call>: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, args: &C::Args<'_>, state: &mut C::State) -> bool;
    fn pre_record(&self, args: &C::Args<'_>, state: &mut C::State);
    fn post_record(&self, args: &C::Args<'_>, state: &mut C::State, output: &C::Output);
}

struct Hooked<V>(Arc<ValidatorCell<V>>);

impl<C: Call, V: Intercept<C>> Link<C> for Hooked<V> {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn validate(&self, args: &C::Args<'_>, state: &mut C::State) -> bool {
        <V as Intercept<C>>::validate(&*self.0.read(), args, state)
    }

    fn pre_record(&self, args: &C::Args<'_>, state: &mut C::State) {
        <V as Intercept<C>>::pre_record(&mut self.0.record(), args, state);
    }

    fn post_record(&self, args: &C::Args<'_>, state: &mut C::State, output: &C::Output) {
        <V as Intercept<C>>::post_record(&mut self.0.record(), args, state, output);
    }
}

type Links<C> = Vec<Box<dyn Link<C>>>;

/// Call type -> the links that hook it, in chain order.
#[derive(Default)]
struct CallTable {
    links: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl CallTable {
    fn push<C: Call>(&mut self, link: Box<dyn Link<C>>) {
        let slot = self
            .links
            .entry(TypeId::of::<C>())
            .or_insert_with(|| Box::new(Links::<C>::new()));
        if let Some(links) = slot.downcast_mut::<Links<C>>() {
            links.push(link);
        }
    }

    fn get<C: Call>(&self) -> &[Box<dyn Link<C>>] {
        self.links
            .get(&TypeId::of::<C>())
            .and_then(|slot| slot.downcast_ref::<Links<C>>())
            .map(|links| links.as_slice())
            .unwrap_or(&[])
    }
}

// ── Chain ───────────────────────────────────────────────────

pub struct ChainMember {
    kind: ValidatorKind,
    id: ValidatorId,
    object: Arc<dyn Any + Send + Sync>,
}

impl ChainMember {
    pub fn kind(&self) -> ValidatorKind {
        self.kind
    }

    pub fn id(&self) -> ValidatorId {
        self.id
    }

    pub fn get<V: Validator>(&self) -> Option<Arc<ValidatorCell<V>>> {
        Arc::clone(&self.object).downcast::<ValidatorCell<V>>().ok()
    }
}

#[derive(Default)]
pub struct ChainBuilder {
    members: Vec<ChainMember>,
    table: CallTable,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a validator to the chain and register its hooks.
    pub fn push<V: Validator>(&mut self, kind: ValidatorKind, validator: V) -> Arc<ValidatorCell<V>> {
        let cell = ValidatorCell::new(kind.name(), validator);
        V::intercepts(&mut Hooks {
            cell: &cell,
            table: &mut self.table,
        });
        self.members.push(ChainMember {
            kind,
            id: cell.id(),
            object: Arc::clone(&cell) as Arc<dyn Any + Send + Sync>,
        });
        cell
    }

    pub fn build(self) -> ValidatorChain {
        ValidatorChain {
            members: self.members,
            table: self.table,
        }
    }
}

#[derive(Default)]
pub struct ValidatorChain {
    members: Vec<ChainMember>,
    table: CallTable,
}

impl ValidatorChain {
    pub fn builder() -> ChainBuilder {
        ChainBuilder::new()
    }

    pub fn members(&self) -> &[ChainMember] {
        &self.members
    }

    pub fn kinds(&self) -> Vec<ValidatorKind> {
        self.members.iter().map(ChainMember::kind).collect()
    }

    /// First validator of type `V`.
    pub fn find<V: Validator>(&self) -> Option<Arc<ValidatorCell<V>>> {
        self.members.iter().find_map(ChainMember::get::<V>)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Number of validators hooking `C`.
    pub fn hooks<C: Call>(&self) -> usize {
        self.table.get::<C>().len()
    }

    /// Run `C` through the chain. `call_down` is invoked at most once, and
    /// never if a Validate hook vetoes.
    pub fn intercept<C: Call>(
        &self,
        args: &C::Args<'_>,
        call_down: impl FnOnce(&mut C::State) -> C::Output,
    ) -> C::Output {
        let links = self.table.get::<C>();
        let mut state = C::State::default();

        for link in links {
            if link.validate(args, &mut state) {
                tracing::debug!(call = C::NAME, validator = link.name(), "call vetoed");
                return C::Output::vetoed();
            }
        }
        for link in links {
            link.pre_record(args, &mut state);
        }
        let output = call_down(&mut state);
        for link in links {
            link.post_record(args, &mut state, &output);
        }
        output
    }
}
