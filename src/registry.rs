//! Entity registry: global entities plus per-user overrides
//!
//! Each entity kind lives in its own namespace. Lookups for a user consult
//! that user's overrides first, then the global namespace.

use crate::error::{EngineError, EngineResult, EntityKind};
use crate::model::{Action, CallbackHandler, Command, ResourceRef, Stage, UserId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

type Namespace<T> = HashMap<ResourceRef, Arc<T>>;

/// One map per entity kind
#[doc(hidden)]
#[derive(Default)]
pub struct Namespaces {
    commands: Namespace<Command>,
    stages: Namespace<Stage>,
    callback_handlers: Namespace<CallbackHandler>,
    actions: Namespace<Action>,
}

/// An entity kind the registry can hold
pub trait Registrable: Send + Sync + 'static {
    const KIND: EntityKind;

    fn reference(&self) -> &ResourceRef;

    #[doc(hidden)]
    fn namespace(namespaces: &Namespaces) -> &Namespace<Self>;

    #[doc(hidden)]
    fn namespace_mut(namespaces: &mut Namespaces) -> &mut Namespace<Self>;
}

macro_rules! registrable {
    ($ty:ty, $kind:expr, $field:ident) => {
        impl Registrable for $ty {
            const KIND: EntityKind = $kind;

            fn reference(&self) -> &ResourceRef {
                self.name()
            }

            fn namespace(namespaces: &Namespaces) -> &Namespace<Self> {
                &namespaces.$field
            }

            fn namespace_mut(namespaces: &mut Namespaces) -> &mut Namespace<Self> {
                &mut namespaces.$field
            }
        }
    };
}

registrable!(Command, EntityKind::Command, commands);
registrable!(Stage, EntityKind::Stage, stages);
registrable!(CallbackHandler, EntityKind::CallbackHandler, callback_handlers);
registrable!(Action, EntityKind::Action, actions);

#[derive(Default)]
struct Inner {
    global: Namespaces,
    /// Created lazily on a user's first override
    overrides: HashMap<UserId, Namespaces>,
}

/// Registry of commands, stages, callback handlers and actions.
///
/// A single lock guards every namespace, so registration, overrides and
/// lookups never observe a half-created override bundle.
#[derive(Default)]
pub struct EntityRegistry {
    inner: RwLock<Inner>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a global entity; an existing reference in the same namespace is an error
    pub fn register<T: Registrable>(&self, entity: T) -> EngineResult<()> {
        let reference = entity.reference().clone();
        let mut inner = self.write();
        let namespace = T::namespace_mut(&mut inner.global);
        if namespace.contains_key(&reference) {
            return Err(EngineError::already_exists(T::KIND, reference));
        }
        tracing::debug!(kind = %T::KIND, reference = %reference, "Registered entity");
        namespace.insert(reference, Arc::new(entity));
        Ok(())
    }

    /// Replace an entity globally (no users) or for each listed user
    pub fn override_entity<T: Registrable>(&self, entity: T, users: &[UserId]) {
        let reference = entity.reference().clone();
        let entity = Arc::new(entity);
        let mut inner = self.write();
        if users.is_empty() {
            tracing::debug!(kind = %T::KIND, reference = %reference, "Overrode global entity");
            T::namespace_mut(&mut inner.global).insert(reference, entity);
            return;
        }
        for user_id in users {
            let bundle = inner.overrides.entry(*user_id).or_default();
            T::namespace_mut(bundle).insert(reference.clone(), Arc::clone(&entity));
        }
        tracing::debug!(
            kind = %T::KIND,
            reference = %reference,
            users = users.len(),
            "Overrode entity for users"
        );
    }

    /// Resolve `reference` for `user_id`: user override, then global
    pub fn get<T: Registrable>(&self, user_id: UserId, reference: &str) -> EngineResult<Arc<T>> {
        if reference.is_empty() {
            return Err(EngineError::not_found(T::KIND, reference));
        }
        let inner = self.read();
        inner
            .overrides
            .get(&user_id)
            .and_then(|bundle| T::namespace(bundle).get(reference))
            .or_else(|| T::namespace(&inner.global).get(reference))
            .cloned()
            .ok_or_else(|| EngineError::not_found(T::KIND, reference))
    }

    /// Resolve in the global namespace only
    pub fn get_global<T: Registrable>(&self, reference: &str) -> EngineResult<Arc<T>> {
        if reference.is_empty() {
            return Err(EngineError::not_found(T::KIND, reference));
        }
        T::namespace(&self.read().global)
            .get(reference)
            .cloned()
            .ok_or_else(|| EngineError::not_found(T::KIND, reference))
    }

    pub fn register_command(&self, command: Command) -> EngineResult<()> {
        self.register(command)
    }

    pub fn register_stage(&self, stage: Stage) -> EngineResult<()> {
        self.register(stage)
    }

    pub fn register_callback_handler(&self, handler: CallbackHandler) -> EngineResult<()> {
        self.register(handler)
    }

    pub fn register_action(&self, action: Action) -> EngineResult<()> {
        self.register(action)
    }

    pub fn override_command(&self, command: Command, users: &[UserId]) {
        self.override_entity(command, users);
    }

    pub fn override_stage(&self, stage: Stage, users: &[UserId]) {
        self.override_entity(stage, users);
    }

    pub fn override_callback_handler(&self, handler: CallbackHandler, users: &[UserId]) {
        self.override_entity(handler, users);
    }

    pub fn override_action(&self, action: Action, users: &[UserId]) {
        self.override_entity(action, users);
    }

    pub fn command(&self, user_id: UserId, reference: &str) -> EngineResult<Arc<Command>> {
        self.get(user_id, reference)
    }

    pub fn stage(&self, user_id: UserId, reference: &str) -> EngineResult<Arc<Stage>> {
        self.get(user_id, reference)
    }

    pub fn callback_handler(
        &self,
        user_id: UserId,
        reference: &str,
    ) -> EngineResult<Arc<CallbackHandler>> {
        self.get(user_id, reference)
    }

    pub fn action(&self, user_id: UserId, reference: &str) -> EngineResult<Arc<Action>> {
        self.get(user_id, reference)
    }
}
