//! Start-up seeding.
//!
//! Built-in roles, features and modules get name-derived ids so seeding can
//! run on every start against a restored snapshot without duplicating them.

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::auth::password::hash_password;
use crate::context::{ADMINISTRATOR, COMPANY_ADMINISTRATOR};
use crate::features::companies::Company;
use crate::features::features::Feature;
use crate::features::modules::Module;
use crate::features::roles::Role;
use crate::features::users::{User, unique_email};
use crate::permissions::{ModulePermissions, PermissionMap};
use crate::repository::{Repository, WriteSet};
use crate::state::AppState;

struct FeatureSeed {
    name: &'static str,
    is_core: bool,
    is_production: bool,
    modules: &'static [&'static str],
}

const FEATURES: &[FeatureSeed] = &[
    FeatureSeed {
        name: "Core",
        is_core: true,
        is_production: true,
        modules: &[
            "companies",
            "users",
            "roles",
            "features",
            "modules",
            "notifications",
            "push-subscriptions",
        ],
    },
    FeatureSeed {
        name: "Inventory",
        is_core: false,
        is_production: true,
        modules: &["equipments", "suppliers", "s3"],
    },
    FeatureSeed {
        name: "Workforce",
        is_core: false,
        is_production: true,
        modules: &["employees", "loans"],
    },
    FeatureSeed {
        name: "Insights",
        is_core: false,
        is_production: true,
        modules: &["analytics", "audits"],
    },
];

struct RoleSeed {
    name: &'static str,
    description: &'static str,
    is_selectable: bool,
    full: &'static [&'static str],
    read: &'static [&'static str],
}

const ROLES: &[RoleSeed] = &[
    RoleSeed {
        name: ADMINISTRATOR,
        description: "Platform administrator",
        is_selectable: false,
        full: &[],
        read: &[],
    },
    RoleSeed {
        name: COMPANY_ADMINISTRATOR,
        description: "Manages every enabled module of their company",
        is_selectable: true,
        full: &[],
        read: &[],
    },
    RoleSeed {
        name: "Manager",
        description: "Runs the inventory and the loans",
        is_selectable: true,
        full: &["employees", "equipments", "loans", "suppliers", "s3"],
        read: &["analytics", "audits", "users"],
    },
    RoleSeed {
        name: "Viewer",
        description: "Read-only access to the inventory",
        is_selectable: true,
        full: &[],
        read: &["employees", "equipments", "loans", "suppliers", "analytics"],
    },
];

const PLATFORM_COMPANY: &str = "Platform";

fn seed_id(kind: &str, name: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("urn:assetgraph:{kind}:{name}").as_bytes())
}

pub fn role_id(name: &str) -> Uuid {
    seed_id("role", name)
}

pub fn feature_id(name: &str) -> Uuid {
    seed_id("feature", name)
}

pub fn module_id(name: &str) -> Uuid {
    seed_id("module", name)
}

/// Ids of the features new companies start with
pub fn production_features(state: &AppState) -> Result<Vec<Uuid>, crate::error::ApiError> {
    Ok(Repository::<Feature>::new(&state.store)
        .find_where("isProduction", true)?
        .into_iter()
        .map(|feature| feature.id)
        .collect())
}

/// Seed everything that is missing; existing nodes are left untouched
pub fn run(state: &AppState) -> Result<()> {
    let _guard = state.store.lock_writes();
    let roles = seed_roles(state).context("failed to seed roles")?;
    let features = seed_features(state).context("failed to seed features")?;
    let admin = seed_admin(state).context("failed to create the bootstrap administrator")?;
    tracing::info!(roles, features, admin, "bootstrap complete");
    Ok(())
}

fn seed_roles(state: &AppState) -> Result<usize> {
    let repo = Repository::<Role>::new(&state.store);
    let mut created = 0;
    for seed in ROLES {
        let id = role_id(seed.name);
        if repo.load(id)?.is_some() {
            continue;
        }
        let mut permissions = PermissionMap::new();
        for module in seed.read {
            permissions.insert(module.to_string(), ModulePermissions::READ_ONLY);
        }
        for module in seed.full {
            permissions.insert(module.to_string(), ModulePermissions::ALL);
        }

        let mut write = WriteSet::new();
        write
            .set("name", seed.name)
            .set("description", seed.description)
            .set("isSelectable", seed.is_selectable)
            .set("permissions", serde_json::to_string(&permissions)?);
        repo.create(id, write)?;
        created += 1;
    }
    Ok(created)
}

fn seed_features(state: &AppState) -> Result<usize> {
    let features = Repository::<Feature>::new(&state.store);
    let modules = Repository::<Module>::new(&state.store);
    let mut created = 0;
    for seed in FEATURES {
        let id = feature_id(seed.name);
        if features.load(id)?.is_none() {
            let mut write = WriteSet::new();
            write
                .set("name", seed.name)
                .set("isCore", seed.is_core)
                .set("isProduction", seed.is_production);
            features.create(id, write)?;
            created += 1;
        }

        for module in seed.modules {
            let id_of_module = module_id(module);
            if modules.load(id_of_module)?.is_some() {
                continue;
            }
            let mut write = WriteSet::new();
            write
                .set("name", *module)
                .set("isCore", seed.is_core)
                .relate_one("feature", Some(id));
            modules.create(id_of_module, write)?;
        }
    }
    Ok(created)
}

/// Administrator from configuration, in its own platform company
fn seed_admin(state: &AppState) -> Result<bool> {
    let (Some(email), Some(password)) = (
        state.config.bootstrap_admin_email.as_deref(),
        state.config.bootstrap_admin_password.as_deref(),
    ) else {
        return Ok(false);
    };
    let users = Repository::<User>::new(&state.store);
    if !users
        .find_where("email", email.trim().to_lowercase())?
        .is_empty()
    {
        return Ok(false);
    }
    let email = unique_email(&state.store, email, None)?;

    let company = seed_id("company", PLATFORM_COMPANY);
    let companies = Repository::<Company>::new(&state.store);
    if companies.load(company)?.is_none() {
        let all_features = FEATURES.iter().map(|seed| feature_id(seed.name)).collect();
        let mut write = WriteSet::new();
        write
            .set("name", PLATFORM_COMPANY)
            .relate("features", all_features);
        companies.create(company, write)?;
    }

    let mut write = WriteSet::new();
    write
        .set("email", email.as_str())
        .set("name", "Administrator")
        .set("passwordHash", hash_password(password)?)
        .set("isActive", true)
        .relate_one("company", Some(company))
        .relate("roles", vec![role_id(ADMINISTRATOR)]);
    let id = Uuid::new_v4();
    users.create(id, write)?;
    tracing::info!(user = %id, email = %email, "bootstrap administrator created");
    Ok(true)
}
