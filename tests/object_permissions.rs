use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use uuid::Uuid;

use object_rules::app::entity_catalog;
use object_rules::models::parcel::Parcel;
use object_rules::rules::template::{PermsNode, TemplateContext};
use object_rules::rules::{
    hooks, loader, BackendChain, CentralHooks, Engine, EngineConfig, ModelPermissionBackend, ObjectPermissionBackend,
    Principal, RuleRegistry, RulesError,
};
use object_rules::RulesConfig;

fn parcel(supplier_id: Uuid, disposable: bool) -> Parcel {
    let now = Utc::now();
    Parcel {
        id: Uuid::new_v4(),
        supplier_id,
        name: "Spare parts".to_string(),
        disposable,
        created_at: now,
        updated_at: now,
    }
}

/// Registry loaded from the shipped rulesets.
fn shipping_registry() -> Result<Arc<RuleRegistry>> {
    let registry = Arc::new(RuleRegistry::default());
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("rulesets");
    loader::sync_dir(&root, &registry, &entity_catalog())?;
    Ok(registry)
}

fn engine(config: EngineConfig) -> Result<Arc<Engine>> {
    Ok(Arc::new(Engine::new(shipping_registry()?, config).with_hooks(CentralHooks::builtin())))
}

fn config_from(pairs: &[(&str, &str)]) -> Result<RulesConfig> {
    let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    Ok(RulesConfig::from_lookup(|key| vars.get(key).cloned())?)
}

#[test]
fn supplier_rule_decides_shipping() -> Result<()> {
    let engine = engine(EngineConfig::default())?;
    let supplier = Principal::new(Uuid::new_v4());
    let stranger = Principal::new(Uuid::new_v4());
    let target = parcel(supplier.user_id, false);

    assert!(engine.evaluate(&supplier, "can_ship", Some(&target))?);
    assert!(!engine.evaluate(&stranger, "can_ship", Some(&target))?);
    assert!(!engine.evaluate(&Principal::anonymous(), "can_ship", Some(&target))?);
    assert!(!engine.evaluate(&supplier, "can_ship", None)?);
    assert!(engine.evaluate(&supplier, " can_ship ", Some(&target))?, "codenames are trimmed before lookup");
    Ok(())
}

#[test]
fn disposable_flag_decides_trashing_for_everyone() -> Result<()> {
    let engine = engine(EngineConfig::default())?;
    let supplier = Principal::new(Uuid::new_v4());
    let stranger = Principal::new(Uuid::new_v4());

    let junk = parcel(supplier.user_id, true);
    let heirloom = parcel(supplier.user_id, false);

    assert!(engine.evaluate(&stranger, "can_trash", Some(&junk))?);
    assert!(!engine.evaluate(&supplier, "can_trash", Some(&heirloom))?);
    Ok(())
}

#[test]
fn missing_rule_follows_store_policy() -> Result<()> {
    let principal = Principal::new(Uuid::new_v4());
    let target = parcel(principal.user_id, true);

    let memory = config_from(&[])?;
    let lenient = engine(memory.engine)?;
    assert!(!lenient.evaluate(&principal, "can_return", Some(&target))?);

    let database = config_from(&[("RULES_STORE", "database")])?;
    let strict = engine(database.engine)?;
    let err = strict.evaluate(&principal, "can_return", Some(&target)).unwrap_err();
    assert!(matches!(err, RulesError::NonexistentPermission { .. }));
    assert_eq!(err.kind(), "nonexistent_permission");
    Ok(())
}

#[test]
fn superuser_hook_short_circuits_object_rules() -> Result<()> {
    let config = config_from(&[("CENTRAL_AUTHORIZATIONS", hooks::SUPERUSERS)])?;
    let engine = engine(config.engine)?;
    let object_only = BackendChain::new().with_backend(Arc::new(ObjectPermissionBackend::new(engine)));

    let target = parcel(Uuid::new_v4(), false);
    let admin = Principal::new(Uuid::new_v4()).superuser();
    assert!(object_only.has_perm(&admin, "can_ship", Some(&target))?);
    assert!(object_only.has_perm(&admin, "can_trash", Some(&target))?);

    let retired = Principal::new(Uuid::new_v4()).superuser().inactive();
    assert!(!object_only.has_perm(&retired, "can_ship", Some(&target))?);

    let plain = Principal::new(Uuid::new_v4());
    assert!(!object_only.has_perm(&plain, "can_ship", Some(&target))?);
    Ok(())
}

#[test]
fn configured_anonymous_user_stands_in_for_anonymous_callers() -> Result<()> {
    let guest = Uuid::new_v4();
    let guest_id = guest.to_string();
    let config = config_from(&[("ANONYMOUS_USER_ID", guest_id.as_str())])?;
    let engine = engine(config.engine)?;

    let guest_parcel = parcel(guest, false);
    assert!(engine.evaluate(&Principal::anonymous(), "can_ship", Some(&guest_parcel))?);
    assert!(!engine.evaluate(&Principal::new(Uuid::new_v4()), "can_ship", Some(&guest_parcel))?);
    Ok(())
}

#[test]
fn standard_chain_consults_model_grants_first() -> Result<()> {
    let engine = engine(EngineConfig::default())?;
    let model = ModelPermissionBackend::new().grant_role("shipper", ["can_ship".to_string()]);
    let chain = BackendChain::standard(engine, model);

    let target = parcel(Uuid::new_v4(), false);
    let shipper = Principal::new(Uuid::new_v4()).with_roles(["shipper".to_string()]);
    let stranger = Principal::new(Uuid::new_v4());

    assert!(chain.has_perm(&shipper, "can_ship", Some(&target))?);
    assert!(!chain.has_perm(&stranger, "can_ship", Some(&target))?);
    Ok(())
}

#[test]
fn template_tag_binds_decisions_for_parcels() -> Result<()> {
    let engine = engine(EngineConfig::default())?;
    let chain = BackendChain::standard(engine, ModelPermissionBackend::new());

    let supplier = Principal::new(Uuid::new_v4());
    let courier = Principal::new(Uuid::new_v4());
    let target = parcel(supplier.user_id, false);

    let mut ctx = TemplateContext::for_user(supplier);
    ctx.insert_principal("courier", courier);
    ctx.insert_target("parcel", &target);

    PermsNode::parse("has_perm parcel.can_ship")?.render(&mut ctx, &chain)?;
    PermsNode::parse("has_perm courier parcel.can_ship as courier_ships")?.render(&mut ctx, &chain)?;
    PermsNode::parse("has_perm parcel.can_trash as trashable")?.render(&mut ctx, &chain)?;

    assert_eq!(ctx.flag("parcel_can_ship"), Some(true));
    assert_eq!(ctx.flag("courier_ships"), Some(false));
    assert_eq!(ctx.flag("trashable"), Some(false));

    let err = PermsNode::parse("has_perm parcel.can_ship as")
        .and_then(|node| node.render(&mut ctx, &chain))
        .unwrap_err();
    assert!(matches!(err, RulesError::TemplateSyntax(_)));
    Ok(())
}
