use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use super::companies::Company;
use super::users::User;
use crate::context::RequestContext;
use crate::error::{ApiError, Result};
use crate::graph::sanitize::node_iri;
use crate::jsonapi::IncomingDocument;
use crate::mapper::{MappingError, Record};
use crate::repository::{Repository, WriteSet};
use crate::resource::{
    ApiEntity, Entity, Related, RelationshipDescriptor, ResourceDescriptor, Scope,
    boxed_from_record,
};
use crate::service::{CrudResource, NoAttributes, Operations};
use crate::state::AppState;
use crate::validation::{
    ValidationError, Violations, validate_object_key, validate_range, validate_required,
};

/// Largest object size accepted, in bytes
const MAX_OBJECT_SIZE: i64 = 5 * 1024 * 1024 * 1024;

static RELATIONSHIPS: [RelationshipDescriptor; 2] = [
    RelationshipDescriptor::one("company", "BELONGS_TO", "companies").read_only(),
    RelationshipDescriptor::one("uploader", "UPLOADED_BY", "users").read_only(),
];

pub static S3_OBJECTS: ResourceDescriptor = ResourceDescriptor {
    type_name: "s3",
    endpoint: "s3",
    label: "S3",
    attributes: &["key", "contentType", "size", "url", "createdAt"],
    relationships: &RELATIONSHIPS,
    scope: Scope::Company,
    search_fields: &["key"],
    sortable: &["key", "size", "createdAt"],
    default_sort: "createdAt",
    persisted: true,
    from_record: Some(boxed_from_record::<S3Object>),
};

/// Metadata of a stored file
#[derive(Debug, Clone)]
pub struct S3Object {
    pub id: Uuid,
    pub key: String,
    pub content_type: Option<String>,
    pub size: Option<i64>,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub company: Option<Company>,
    pub uploader: Option<User>,
}

impl ApiEntity for S3Object {
    fn descriptor(&self) -> &'static ResourceDescriptor {
        &S3_OBJECTS
    }

    fn id(&self) -> String {
        self.id.to_string()
    }

    fn attributes(&self) -> IndexMap<&'static str, Value> {
        IndexMap::from([
            ("key", json!(self.key)),
            ("contentType", json!(self.content_type)),
            ("size", json!(self.size)),
            ("url", json!(self.url)),
            ("createdAt", json!(self.created_at)),
        ])
    }

    fn relationships(&self) -> Vec<(&'static str, Related<'_>)> {
        vec![
            ("company", Related::one(&self.company)),
            ("uploader", Related::one(&self.uploader)),
        ]
    }
}

impl Entity for S3Object {
    fn resource() -> &'static ResourceDescriptor {
        &S3_OBJECTS
    }

    fn from_record(record: &Record) -> Result<Self, MappingError> {
        let node = record.node();
        Ok(Self {
            id: node.id,
            key: node.string("key")?,
            content_type: node.opt_string("contentType")?,
            size: node.opt_integer("size")?,
            url: node.string("url")?,
            created_at: node.datetime("createdAt")?,
            company: record.single("company")?,
            uploader: record.single("uploader")?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectAttributes {
    key: Option<String>,
    content_type: Option<String>,
    size: Option<i64>,
}

fn valid_content_type(value: &str) -> bool {
    let mut parts = value.splitn(2, '/');
    match (parts.next(), parts.next()) {
        (Some(kind), Some(sub)) => {
            let token = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || "!#$&-^_.+".contains(c));
            token(kind) && token(sub.split(';').next().unwrap_or_default().trim())
        }
        _ => false,
    }
}

impl CrudResource for S3Object {
    type Create = ObjectAttributes;
    type Update = NoAttributes;

    const OPERATIONS: Operations = Operations::NO_UPDATE;

    fn prepare_create(state: &AppState, ctx: &RequestContext, doc: IncomingDocument<Self::Create>) -> Result<WriteSet> {
        let attrs = doc.attributes;
        let mut violations = Violations::new();
        let key = violations
            .check(validate_required("key", attrs.key.as_deref()))
            .map(str::trim);
        if let Some(key) = key {
            violations.check(validate_object_key("key", key));
        }
        if let Some(content_type) = &attrs.content_type {
            if !valid_content_type(content_type) {
                violations.push(ValidationError::Format {
                    field: "contentType".into(),
                    expected: "media type".into(),
                });
            }
        }
        if let Some(size) = attrs.size {
            violations.check(validate_range("size", size, 0, MAX_OBJECT_SIZE));
        }
        violations.finish()?;

        let key = key.unwrap_or_default().to_string();
        if Repository::<S3Object>::new(&state.store).exists_where("key", key.as_str(), None, true)? {
            return Err(ApiError::conflict(format!("object '{key}' already exists")));
        }

        let mut write = WriteSet::new();
        write
            .set("url", state.config.file_url(&key))
            .set("key", key)
            .relate_node("uploader", node_iri("User", ctx.user_id));
        if let Some(content_type) = attrs.content_type {
            write.set("contentType", content_type.to_ascii_lowercase());
        }
        if let Some(size) = attrs.size {
            write.set("size", size);
        }
        Ok(write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::CrudService;
    use serde_json::json;

    #[test]
    fn content_types() {
        assert!(valid_content_type("image/png"));
        assert!(valid_content_type("text/plain; charset=utf-8"));
        assert!(!valid_content_type("png"));
        assert!(!valid_content_type("image/"));
    }

    #[test]
    fn url_follows_file_base() {
        let state = crate::testing::state();
        let company = Uuid::new_v4();
        let mut write = WriteSet::new();
        write.set("name", "Acme");
        Repository::<Company>::new(&state.store).create(company, write).unwrap();
        let ctx = RequestContext::new(Uuid::new_v4(), company, vec!["Administrator".into()]);

        let service = CrudService::<S3Object>::new(&state);
        let body = |key: &str| {
            json!({ "data": { "type": "s3", "attributes": { "key": key, "contentType": "image/PNG", "size": 2048 } } })
                .to_string()
        };
        RequestContext::sync_scope(ctx.clone(), || {
            let object = service.create(&ctx, body("equipment/drill.png").as_bytes()).unwrap();
            assert_eq!(object.url, "/files/equipment/drill.png");
            assert_eq!(object.content_type.as_deref(), Some("image/png"));
            assert_eq!(object.size, Some(2048));

            let err = service.create(&ctx, body("equipment/drill.png").as_bytes()).unwrap_err();
            assert_eq!(err.code, crate::error::ErrorCode::Conflict);
            let err = service.create(&ctx, body("../etc/passwd").as_bytes()).unwrap_err();
            assert_eq!(err.code, crate::error::ErrorCode::ValidationFailed);
        });
    }
}
