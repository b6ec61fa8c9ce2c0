//! Generic persistence for resources.
//!
//! Queries are assembled from the resource descriptor, the caller's
//! [`ListQuery`] and the ambient [`RequestContext`]. Without a context (start-up
//! seeding, login) the repository acts for the system and sees every node.

use chrono::Utc;
use std::marker::PhantomData;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::{ApiError, Result};
use crate::graph::sanitize::{
    RDF_TYPE, escape_literal, escape_regex_literal, label_iri, node_iri, prop_iri, rel_iri,
    validate_identifier,
};
use crate::graph::{Direction, GraphStore, PropertyValue, QueryBuilder, UpdateBuilder};
use crate::jsonapi::ListQuery;
use crate::mapper::EntityFactory;
use crate::registry::MODELS;
use crate::resource::{Entity, ResourceDescriptor, Scope, Target};
use crate::validation::{ValidationError, Violations};

pub const NODE_VAR: &str = "?node";
pub const COMPANY_EDGE: &str = "BELONGS_TO";

/// One page of entities and the size of the whole result
#[derive(Debug)]
pub struct Page<E> {
    pub items: Vec<E>,
    pub total: u64,
}

/// Attribute and relationship changes for create and update
#[derive(Debug, Clone, Default)]
pub struct WriteSet {
    properties: Vec<(&'static str, Option<PropertyValue>)>,
    relationships: Vec<(&'static str, Vec<Uuid>)>,
    dynamic: Vec<(&'static str, String)>,
}

impl WriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &'static str, value: impl Into<PropertyValue>) -> &mut Self {
        self.properties.retain(|(n, _)| *n != name);
        self.properties.push((name, Some(value.into())));
        self
    }

    pub fn unset(&mut self, name: &'static str) -> &mut Self {
        self.properties.retain(|(n, _)| *n != name);
        self.properties.push((name, None));
        self
    }

    /// Set when `Some`, remove when `None`
    pub fn set_opt<V: Into<PropertyValue>>(&mut self, name: &'static str, value: Option<V>) -> &mut Self {
        match value {
            Some(value) => self.set(name, value),
            None => self.unset(name),
        }
    }

    /// Apply a PATCH attribute: absent leaves it alone, `null` removes it
    pub fn patch<V: Into<PropertyValue>>(
        &mut self,
        name: &'static str,
        value: Option<Option<V>>,
    ) -> &mut Self {
        match value {
            None => self,
            Some(value) => self.set_opt(name, value),
        }
    }

    pub fn relate(&mut self, token: &'static str, ids: Vec<Uuid>) -> &mut Self {
        self.relationships.retain(|(t, _)| *t != token);
        self.relationships.push((token, ids));
        self
    }

    pub fn relate_one(&mut self, token: &'static str, id: Option<Uuid>) -> &mut Self {
        self.relate(token, id.into_iter().collect())
    }

    /// Point a polymorphic relationship at an existing node
    pub fn relate_node(&mut self, token: &'static str, iri: String) -> &mut Self {
        self.dynamic.retain(|(t, _)| *t != token);
        self.dynamic.push((token, iri));
        self
    }

    pub fn property(&self, name: &str) -> Option<Option<&PropertyValue>> {
        self.properties
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_ref())
    }

    pub fn relationship(&self, token: &str) -> Option<&[Uuid]> {
        self.relationships
            .iter()
            .find(|(t, _)| *t == token)
            .map(|(_, ids)| ids.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && self.relationships.is_empty() && self.dynamic.is_empty()
    }
}

/// Restrict `var` to nodes of `descriptor` visible to `ctx`
pub fn apply_scope(
    builder: QueryBuilder,
    descriptor: &ResourceDescriptor,
    var: &str,
    ctx: Option<&RequestContext>,
) -> QueryBuilder {
    let builder = builder.pattern(format!("{var} a <{}>", label_iri(descriptor.label)));
    let Some(ctx) = ctx else {
        return builder;
    };

    match descriptor.scope {
        Scope::Global => builder,
        Scope::Company if ctx.is_admin() => builder,
        Scope::Company => builder.edge(
            var,
            COMPANY_EDGE,
            Direction::Outgoing,
            &format!("<{}>", node_iri("Company", ctx.company_id)),
        ),
        Scope::OwnCompany if ctx.is_admin() => builder,
        Scope::OwnCompany => {
            builder.filter(format!("{var} = <{}>", node_iri("Company", ctx.company_id)))
        }
        Scope::Owner(token) => match descriptor.relationship(token) {
            Some(rel) => builder.edge(
                var,
                rel.edge,
                rel.direction,
                &format!("<{}>", node_iri("User", ctx.user_id)),
            ),
            None => builder.filter("false"),
        },
    }
}

pub struct Repository<E: Entity> {
    store: GraphStore,
    descriptor: &'static ResourceDescriptor,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Repository<E> {
    pub fn new(store: &GraphStore) -> Self {
        Self {
            store: store.clone(),
            descriptor: E::resource(),
            _entity: PhantomData,
        }
    }

    pub fn iri(id: Uuid) -> String {
        node_iri(E::resource().label, id)
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    fn constrain(
        &self,
        mut builder: QueryBuilder,
        query: &ListQuery,
        custom: &[String],
        ctx: Option<&RequestContext>,
    ) -> Result<QueryBuilder> {
        builder = apply_scope(builder, self.descriptor, NODE_VAR, ctx);

        for (name, value) in &query.filters {
            if self.descriptor.has_attribute(name) {
                validate_identifier("property", name)?;
                let var = builder.fresh_var("f");
                builder = builder
                    .pattern(format!("{NODE_VAR} <{}> {var}", prop_iri(name)))
                    .filter(format!("STR({var}) = \"{}\"", escape_literal(value)));
            } else if let Some(rel) = self.descriptor.relationship(name) {
                let id = Uuid::parse_str(value).map_err(|_| {
                    ApiError::invalid_parameter(
                        format!("filter[{name}]"),
                        format!("'{value}' is not a valid id"),
                    )
                })?;
                let var = builder.fresh_var("r");
                builder = builder
                    .edge(NODE_VAR, rel.edge, rel.direction, &var)
                    .filter(format!("STRENDS(STR({var}), \":{id}\")"));
            }
        }

        for filter in custom {
            builder = builder.filter(filter.clone());
        }

        if let Some(term) = &query.search {
            if !self.descriptor.search_fields.is_empty() {
                let pattern = escape_regex_literal(term);
                let mut clauses = Vec::new();
                for field in self.descriptor.search_fields {
                    let var = builder.fresh_var("s");
                    builder = builder.optional(format!("{NODE_VAR} <{}> {var}", prop_iri(field)));
                    clauses.push(format!("REGEX(STR({var}), \"{pattern}\", \"i\")"));
                }
                builder = builder.filter(clauses.join(" || "));
            }
        }

        Ok(builder)
    }

    /// One page of visible entities matching `query`.
    ///
    /// `custom` holds extra FILTER expressions over `?node` produced by the
    /// owning service for filters it handles itself.
    pub fn find(&self, query: &ListQuery, custom: &[String]) -> Result<Page<E>> {
        let ctx = RequestContext::current();

        let total = self.store.count(
            &self
                .constrain(QueryBuilder::count(NODE_VAR), query, custom, ctx.as_ref())?
                .build(),
        )?;

        let mut builder =
            self.constrain(QueryBuilder::select().distinct().variable(NODE_VAR), query, custom, ctx.as_ref())?;

        let default_sort = [(self.descriptor.default_sort, false)];
        let requested: Vec<_> = query
            .sort
            .iter()
            .map(|s| (s.field.as_str(), s.descending))
            .collect();
        let sort: &[(&str, bool)] = if requested.is_empty() && !self.descriptor.default_sort.is_empty() {
            &default_sort[..]
        } else {
            requested.as_slice()
        };
        for (field, descending) in sort {
            validate_identifier("property", field)?;
            let var = builder.fresh_var("o");
            builder = builder
                .optional(format!("{NODE_VAR} <{}> {var}", prop_iri(field)))
                .order_by(if *descending {
                    format!("DESC({var})")
                } else {
                    format!("ASC({var})")
                });
        }
        builder = builder
            .order_by(NODE_VAR)
            .limit(query.page.size)
            .offset(query.page.offset());

        let iris: Vec<String> = self
            .store
            .select(&builder.build())?
            .iter()
            .filter_map(|row| row.iri("node").map(str::to_string))
            .collect();

        Ok(Page {
            items: self.load_many(&iris)?,
            total,
        })
    }

    /// Every visible entity with `name` equal to `value`
    pub fn find_where(&self, name: &'static str, value: impl Into<PropertyValue>) -> Result<Vec<E>> {
        validate_identifier("property", name)?;
        let ctx = RequestContext::current();
        let builder = apply_scope(
            QueryBuilder::select().distinct().variable(NODE_VAR),
            self.descriptor,
            NODE_VAR,
            ctx.as_ref(),
        )
        .pattern(format!("{NODE_VAR} <{}> {}", prop_iri(name), value.into().to_sparql()))
        .order_by(NODE_VAR);

        let iris: Vec<String> = self
            .store
            .select(&builder.build())?
            .iter()
            .filter_map(|row| row.iri("node").map(str::to_string))
            .collect();
        self.load_many(&iris)
    }

    /// Whether another node of this resource already has `name = value`.
    ///
    /// With `scoped` set only nodes visible to the caller count.
    pub fn exists_where(
        &self,
        name: &'static str,
        value: impl Into<PropertyValue>,
        exclude: Option<Uuid>,
        scoped: bool,
    ) -> Result<bool> {
        validate_identifier("property", name)?;
        let ctx = if scoped { RequestContext::current() } else { None };
        let mut builder = apply_scope(QueryBuilder::ask(), self.descriptor, NODE_VAR, ctx.as_ref())
            .pattern(format!("{NODE_VAR} <{}> {}", prop_iri(name), value.into().to_sparql()));
        if let Some(id) = exclude {
            builder = builder.filter(format!("{NODE_VAR} != <{}>", Self::iri(id)));
        }
        Ok(self.store.ask(&builder.build())?)
    }

    pub fn visible(&self, id: Uuid) -> Result<bool> {
        let ctx = RequestContext::current();
        Ok(self.store.ask(&visibility_query(self.descriptor, id, ctx.as_ref()))?)
    }

    /// Load without scope checks
    pub fn load(&self, id: Uuid) -> Result<Option<E>> {
        Ok(self.load_many(&[Self::iri(id)])?.into_iter().next())
    }

    fn load_many(&self, iris: &[String]) -> Result<Vec<E>> {
        let records = EntityFactory::new(&self.store).hydrate_many(self.descriptor, iris)?;
        Ok(EntityFactory::map_all(&records)?)
    }

    pub fn find_by_id(&self, id: Uuid) -> Result<Option<E>> {
        if !self.visible(id)? {
            return Ok(None);
        }
        self.load(id)
    }

    /// Like [`Repository::find_by_id`], as a 404 when missing
    pub fn get(&self, id: Uuid) -> Result<E> {
        self.find_by_id(id)?
            .ok_or_else(|| ApiError::not_found(self.descriptor.type_name, id))
    }

    pub fn exists(&self, id: Uuid) -> Result<bool> {
        self.visible(id)
    }

    /// Related ids must exist and be visible to the caller
    fn check_links(&self, write: &WriteSet, ctx: Option<&RequestContext>) -> Result<()> {
        let mut violations = Violations::new();
        for (token, ids) in &write.relationships {
            let Some(rel) = self.descriptor.relationship(token) else {
                return Err(ApiError::internal(format!(
                    "{} has no relationship '{token}'",
                    self.descriptor.type_name
                )));
            };
            let Target::Resource(target) = rel.target else {
                continue;
            };
            let target = MODELS.by_type(target)?;
            for id in ids {
                if !self.store.ask(&visibility_query(target, *id, ctx))? {
                    violations.push(ValidationError::Relationship {
                        field: token.to_string(),
                        reason: format!("{} '{id}' does not exist", target.type_name),
                    });
                }
            }
        }
        violations.finish()?;
        Ok(())
    }

    fn link_edges(&self, mut update: UpdateBuilder, iri: &str, write: &WriteSet, replace: bool) -> Result<UpdateBuilder> {
        for (token, ids) in &write.relationships {
            let rel = self
                .descriptor
                .relationship(token)
                .ok_or_else(|| ApiError::internal(format!("unknown relationship '{token}'")))?;
            let target = match rel.target {
                Target::Resource(target) => MODELS.by_type(target)?,
                Target::Dynamic => continue,
            };
            if replace {
                update = update.delete_edges(iri, rel.edge, rel.direction);
            }
            for id in ids {
                update = edge_insert(update, iri, rel.edge, rel.direction, &node_iri(target.label, *id));
            }
        }
        for (token, target_iri) in &write.dynamic {
            let rel = self
                .descriptor
                .relationship(token)
                .ok_or_else(|| ApiError::internal(format!("unknown relationship '{token}'")))?;
            if replace {
                update = update.delete_edges(iri, rel.edge, rel.direction);
            }
            update = edge_insert(update, iri, rel.edge, rel.direction, target_iri);
        }
        Ok(update)
    }

    /// Create a node with `id`, returning the stored entity
    pub fn create(&self, id: Uuid, write: WriteSet) -> Result<E> {
        let ctx = RequestContext::current();
        let iri = Self::iri(id);
        if self.store.node(&iri)?.is_some() {
            return Err(ApiError::conflict(format!(
                "{} '{id}' already exists",
                self.descriptor.type_name
            )));
        }
        self.check_links(&write, ctx.as_ref())?;

        let now = PropertyValue::from(Utc::now());
        let mut update =
            UpdateBuilder::new().insert(&iri, RDF_TYPE, format!("<{}>", label_iri(self.descriptor.label)));
        for stamp in ["createdAt", "updatedAt"] {
            if self.descriptor.has_attribute(stamp) {
                update = update.insert(&iri, &prop_iri(stamp), now.to_sparql());
            }
        }
        for (name, value) in &write.properties {
            validate_identifier("property", name)?;
            if let Some(value) = value {
                update = update.insert(&iri, &prop_iri(name), value.to_sparql());
            }
        }
        update = self.link_edges(update, &iri, &write, false)?;

        if self.descriptor.is_company_scoped() && write.relationship("company").is_none() {
            if let Some(ctx) = &ctx {
                update = update.insert(
                    &iri,
                    &rel_iri(COMPANY_EDGE),
                    format!("<{}>", node_iri("Company", ctx.company_id)),
                );
            }
        }

        self.store.update(&update.build())?;
        tracing::debug!(resource = self.descriptor.type_name, %id, "created");
        self.load(id)?
            .ok_or_else(|| ApiError::internal(format!("{} '{id}' vanished after create", self.descriptor.type_name)))
    }

    /// Apply `write` to a visible node, returning the updated entity
    pub fn update(&self, id: Uuid, write: WriteSet) -> Result<E> {
        let ctx = RequestContext::current();
        if !self.visible(id)? {
            return Err(ApiError::not_found(self.descriptor.type_name, id));
        }
        self.check_links(&write, ctx.as_ref())?;

        let iri = Self::iri(id);
        let mut update = UpdateBuilder::new();
        for (name, value) in &write.properties {
            validate_identifier("property", name)?;
            let predicate = prop_iri(name);
            update = update.delete_property(&iri, &predicate);
            if let Some(value) = value {
                update = update.insert(&iri, &predicate, value.to_sparql());
            }
        }
        update = self.link_edges(update, &iri, &write, true)?;

        if !update.is_empty() && self.descriptor.has_attribute("updatedAt") {
            let predicate = prop_iri("updatedAt");
            update = update
                .delete_property(&iri, &predicate)
                .insert(&iri, &predicate, PropertyValue::from(Utc::now()).to_sparql());
        }

        self.store.update(&update.build())?;
        tracing::debug!(resource = self.descriptor.type_name, %id, "updated");
        self.load(id)?
            .ok_or_else(|| ApiError::not_found(self.descriptor.type_name, id))
    }

    /// Remove a visible node and every edge touching it
    pub fn delete(&self, id: Uuid) -> Result<()> {
        if !self.visible(id)? {
            return Err(ApiError::not_found(self.descriptor.type_name, id));
        }
        self.store
            .update(&UpdateBuilder::new().delete_node(&Self::iri(id)).build())?;
        tracing::debug!(resource = self.descriptor.type_name, %id, "deleted");
        Ok(())
    }
}

fn visibility_query(descriptor: &ResourceDescriptor, id: Uuid, ctx: Option<&RequestContext>) -> String {
    let builder = QueryBuilder::ask().block(format!(
        "VALUES {NODE_VAR} {{ <{}> }}",
        node_iri(descriptor.label, id)
    ));
    apply_scope(builder, descriptor, NODE_VAR, ctx).build()
}

fn edge_insert(update: UpdateBuilder, iri: &str, edge: &str, direction: Direction, other: &str) -> UpdateBuilder {
    match direction {
        Direction::Outgoing => update.insert(iri, &rel_iri(edge), format!("<{other}>")),
        Direction::Incoming => update.insert(other, &rel_iri(edge), format!("<{iri}>")),
    }
}
