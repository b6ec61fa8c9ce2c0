//! Generic CRUD services.
//!
//! A resource opts in by implementing [`CrudResource`]: it names the
//! attribute payloads it accepts and turns checked request documents into a
//! [`WriteSet`]. [`CrudService`] does the rest: permission checks, query
//! parsing, the write lock, persistence and audit records.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::{ApiError, Result};
use crate::features::audits;
use crate::jsonapi::{IncomingDocument, ListQuery};
use crate::permissions::{Action, PermissionService};
use crate::repository::{Page, Repository, WriteSet};
use crate::resource::Entity;
use crate::state::AppState;

/// HTTP operations a resource exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operations {
    pub list: bool,
    pub show: bool,
    pub create: bool,
    pub update: bool,
    pub delete: bool,
}

impl Operations {
    pub const ALL: Self = Self {
        list: true,
        show: true,
        create: true,
        update: true,
        delete: true,
    };

    pub const READ_ONLY: Self = Self {
        list: true,
        show: true,
        create: false,
        update: false,
        delete: false,
    };

    pub const NO_UPDATE: Self = Self {
        update: false,
        ..Self::ALL
    };
}

/// Attribute payload of resources that accept no attributes
#[derive(Debug, Default, Deserialize)]
pub struct NoAttributes {}

/// Per-resource behaviour plugged into [`CrudService`].
///
/// Apart from the `precompute_*` pair, hooks run while the store's write
/// lock is held; they must use repositories directly and never call back
/// into a `CrudService`.
pub trait CrudResource: Entity {
    type Create: DeserializeOwned + Default + Send;
    type Update: DeserializeOwned + Default + Send;

    const OPERATIONS: Operations = Operations::ALL;
    /// `filter[...]` names answered by [`CrudResource::custom_filter`]
    const EXTRA_FILTERS: &'static [&'static str] = &[];
    const AUDITED: bool = true;

    /// Module permission on the resource's endpoint
    fn authorize(state: &AppState, ctx: &RequestContext, action: Action) -> Result<()> {
        PermissionService::new(&state.store).authorize(ctx, Self::resource().endpoint, action)
    }

    /// FILTER expression over `?node` for one of [`CrudResource::EXTRA_FILTERS`]
    fn custom_filter(name: &str, value: &str) -> Result<Option<String>> {
        let _ = value;
        Err(ApiError::invalid_parameter(
            format!("filter[{name}]"),
            format!("unsupported filter '{name}'"),
        ))
    }

    /// Checks and slow derivations over a create payload, before the write lock
    fn precompute_create(attrs: &mut Self::Create) -> Result<()> {
        let _ = attrs;
        Ok(())
    }

    fn precompute_update(attrs: &mut Self::Update) -> Result<()> {
        let _ = attrs;
        Ok(())
    }

    fn prepare_create(
        state: &AppState,
        ctx: &RequestContext,
        doc: IncomingDocument<Self::Create>,
    ) -> Result<WriteSet> {
        let _ = (state, ctx, doc);
        Err(ApiError::forbidden(format!(
            "{} cannot be created",
            Self::resource().type_name
        )))
    }

    fn prepare_update(
        state: &AppState,
        ctx: &RequestContext,
        current: &Self,
        doc: IncomingDocument<Self::Update>,
    ) -> Result<WriteSet> {
        let _ = (state, ctx, current, doc);
        Err(ApiError::forbidden(format!(
            "{} cannot be updated",
            Self::resource().type_name
        )))
    }

    fn after_create(state: &AppState, ctx: &RequestContext, created: &Self) -> Result<()> {
        let _ = (state, ctx, created);
        Ok(())
    }

    fn before_delete(state: &AppState, ctx: &RequestContext, current: &Self) -> Result<()> {
        let _ = (state, ctx, current);
        Ok(())
    }
}

pub struct CrudService<'s, E: CrudResource> {
    state: &'s AppState,
    repo: Repository<E>,
}

impl<'s, E: CrudResource> CrudService<'s, E> {
    pub fn new(state: &'s AppState) -> Self {
        Self {
            state,
            repo: Repository::new(&state.store),
        }
    }

    pub fn repository(&self) -> &Repository<E> {
        &self.repo
    }

    /// Parse `params` and return the matching page together with the parsed query
    pub fn list(&self, ctx: &RequestContext, params: &[(String, String)]) -> Result<(Page<E>, ListQuery)> {
        E::authorize(self.state, ctx, Action::Read)?;
        let query = ListQuery::parse(
            params,
            E::resource(),
            self.state.config.page_defaults(),
            E::EXTRA_FILTERS,
        )?;

        let mut repo_query = query.clone();
        let mut custom = Vec::new();
        repo_query.filters.clear();
        for (name, value) in &query.filters {
            if E::EXTRA_FILTERS.contains(&name.as_str()) {
                if let Some(expression) = E::custom_filter(name, value)? {
                    custom.push(expression);
                }
            } else {
                repo_query.filters.push((name.clone(), value.clone()));
            }
        }

        let page = self.repo.find(&repo_query, &custom)?;
        Ok((page, query))
    }

    pub fn show(&self, ctx: &RequestContext, id: Uuid) -> Result<E> {
        E::authorize(self.state, ctx, Action::Read)?;
        self.repo.get(id)
    }

    pub fn create(&self, ctx: &RequestContext, body: &[u8]) -> Result<E> {
        E::authorize(self.state, ctx, Action::Create)?;
        let mut doc = IncomingDocument::<E::Create>::parse(body, E::resource(), None)?;
        E::precompute_create(&mut doc.attributes)?;
        let id = doc.id.unwrap_or_else(Uuid::new_v4);

        let _guard = self.state.store.lock_writes();
        let write = E::prepare_create(self.state, ctx, doc)?;
        let created = self.repo.create(id, write)?;
        E::after_create(self.state, ctx, &created)?;
        // the hook may have changed related nodes
        let created = self
            .repo
            .load(id)?
            .ok_or_else(|| ApiError::internal(format!("{} '{id}' vanished after create", E::resource().type_name)))?;
        if E::AUDITED {
            audits::record(&self.state.store, ctx, audits::AuditType::Create, &created, true)?;
        }
        tracing::info!(resource = E::resource().type_name, %id, user = %ctx.user_id, "resource created");
        Ok(created)
    }

    pub fn update(&self, ctx: &RequestContext, id: Uuid, body: &[u8]) -> Result<E> {
        E::authorize(self.state, ctx, Action::Update)?;
        let mut doc = IncomingDocument::<E::Update>::parse(body, E::resource(), Some(id))?;
        E::precompute_update(&mut doc.attributes)?;

        let _guard = self.state.store.lock_writes();
        let current = self.repo.get(id)?;
        let write = E::prepare_update(self.state, ctx, &current, doc)?;
        let updated = self.repo.update(id, write)?;
        if E::AUDITED {
            audits::record(&self.state.store, ctx, audits::AuditType::Update, &updated, true)?;
        }
        tracing::info!(resource = E::resource().type_name, %id, user = %ctx.user_id, "resource updated");
        Ok(updated)
    }

    pub fn delete(&self, ctx: &RequestContext, id: Uuid) -> Result<()> {
        E::authorize(self.state, ctx, Action::Delete)?;

        let _guard = self.state.store.lock_writes();
        let current = self.repo.get(id)?;
        E::before_delete(self.state, ctx, &current)?;
        self.repo.delete(id)?;
        if E::AUDITED {
            audits::record(&self.state.store, ctx, audits::AuditType::Delete, &current, false)?;
        }
        tracing::info!(resource = E::resource().type_name, %id, user = %ctx.user_id, "resource deleted");
        Ok(())
    }
}

/// Administrator-only writes, reads for any authenticated caller
pub fn admin_writes(ctx: &RequestContext, action: Action, type_name: &str) -> Result<()> {
    if action == Action::Read || ctx.is_admin() {
        Ok(())
    } else {
        Err(ApiError::forbidden(format!(
            "only administrators may {action} {type_name}"
        )))
    }
}
