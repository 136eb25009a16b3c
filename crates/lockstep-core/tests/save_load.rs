//! Saving agents mid-construction and loading them into another world.

use lockstep_core::prelude::*;
use serde_json::json;

const CATALOG: &str = r#"{
    "worker": {
        "kind": "unit",
        "action_range": "2",
        "mover": { "speed": "4" },
        "construct": {}
    },
    "site": {
        "kind": "structure",
        "structure": { "max_build_points": "3" }
    },
    "post": { "kind": "unit" }
}"#;

fn setup_world() -> (World, ControllerId) {
    let catalog = AgentCatalog::from_json(CATALOG).unwrap();
    let mut world = World::new(catalog, WorldConfig::default());
    let red = world.create_controller("red", Allegiance::Enemy).unwrap();
    (world, red)
}

fn spawn(world: &mut World, controller: ControllerId, code: &str, x: i32) -> AgentHandle {
    world
        .create_agent_facing_right(controller, code, Vec2Fixed::from_num(x, 0))
        .unwrap()
}

/// A worker that has been building a site at x = 1 for 20 ticks.
fn building_world() -> (World, AgentHandle, AgentHandle) {
    let (mut world, red) = setup_world();
    let worker = spawn(&mut world, red, "worker", 0);
    let site = spawn(&mut world, red, "site", 1);
    let site_id = world.agent(site).unwrap().global_id().unwrap();
    let build = Command::new(red, CommandAction::Construct { projects: vec![site_id] })
        .with_selection([0]);
    world.execute(&build).unwrap();
    for _ in 0..20 {
        world.advance();
    }
    (world, worker, site)
}

#[test]
fn save_records_construct_fields() {
    let (world, worker, _) = building_world();
    let save = world.save_agent(worker).unwrap();

    assert_eq!(save.code, "worker");
    assert_eq!(save.position, Vec2Fixed::ZERO);
    let fields = &save.abilities["Construct"];
    assert_eq!(fields["currentProjectId"], json!(1));
    assert_eq!(fields["Focused"], json!(true));
    assert_eq!(fields["InRange"], json!(true));
    assert_eq!(fields["BuildMoving"], json!(false));
    // 20 ticks of charge at 1/32 per tick, as raw 16.16 bits.
    assert_eq!(fields["ConstructCount"], json!(20 * 2048));
    assert_eq!(fields["FastRangeToTarget"], json!(4 << 16));
}

#[test]
fn loaded_builder_resumes_on_the_same_global_id() {
    let (world, worker, _) = building_world();
    let save = world.save_agent(worker).unwrap();
    let json = serde_json::to_string(&save).unwrap();

    // A fresh world where the site holds global ID 1 again.
    let (mut world, red) = setup_world();
    spawn(&mut world, red, "post", 5);
    let site = spawn(&mut world, red, "site", 1);
    assert_eq!(world.agent(site).unwrap().global_id(), Some(1));

    let save: AgentSave = serde_json::from_str(&json).unwrap();
    let loaded = world.load_agent(red, &save).unwrap();
    let agent = world.agent(loaded).unwrap();
    assert_eq!(agent.tag, AgentTag::Builder);
    let construct = agent.construct().unwrap();
    assert_eq!(construct.project(), Some(site));
    assert!(construct.is_focused());
    assert_eq!(construct.construct_count(), Fixed::from_num(20) / 32);

    // Twelve more ticks finish the charge that was saved.
    for _ in 0..12 {
        world.advance();
    }
    let structure = world.agent(site).unwrap().structure.as_ref().unwrap();
    assert_eq!(structure.build_points(), Fixed::ONE);
}

#[test]
fn unresolvable_project_is_dropped() {
    let (world, worker, _) = building_world();
    let save = world.save_agent(worker).unwrap();

    // Global ID 1 is a plain unit here.
    let (mut world, red) = setup_world();
    spawn(&mut world, red, "post", 5);
    spawn(&mut world, red, "post", 6);

    let loaded = world.load_agent(red, &save).unwrap();
    let agent = world.agent(loaded).unwrap();
    assert_eq!(agent.tag, AgentTag::None);
    assert_eq!(agent.construct().unwrap().project(), None);

    world.advance();
    assert_eq!(world.agent(loaded).unwrap().tag, AgentTag::None);
}

#[test]
fn malformed_fields_abort_the_load() {
    let (mut world, red) = setup_world();
    let mut save = AgentSave {
        code: "worker".to_owned(),
        position: Vec2Fixed::ZERO,
        rotation: Vec2Fixed::RIGHT,
        abilities: Default::default(),
    };
    save.abilities.insert(
        "Construct".to_owned(),
        json!({ "Focused": 1 }).as_object().cloned().unwrap(),
    );

    let err = world.load_agent(red, &save).unwrap_err();
    assert!(matches!(
        err,
        CoreError::Persistence { ref field, .. } if field == "Focused"
    ));
    assert_eq!(world.registry().active_count(), 0);
    assert!(world.drain_events().is_empty());

    // The half-built agent went back to the pool.
    let worker = world.catalog().lookup("worker").unwrap();
    assert_eq!(world.registry().pool_len(worker), 1);
}

#[test]
fn unknown_code_and_stale_handles_are_errors() {
    let (mut world, red) = setup_world();
    let save = AgentSave {
        code: "dragon".to_owned(),
        position: Vec2Fixed::ZERO,
        rotation: Vec2Fixed::RIGHT,
        abilities: Default::default(),
    };
    let err = world.load_agent(red, &save).unwrap_err();
    assert!(matches!(err, CoreError::UnknownAgentCode { .. }));

    let post = spawn(&mut world, red, "post", 0);
    world.request_deactivate(post, true);
    world.advance();
    let err = world.save_agent(post).unwrap_err();
    assert!(matches!(err, CoreError::StaleAgent { .. }));
}

#[test]
fn agents_without_abilities_save_empty() {
    let (mut world, red) = setup_world();
    let post = spawn(&mut world, red, "post", 4);
    let save = world.save_agent(post).unwrap();
    assert!(save.abilities.is_empty());
    assert_eq!(save.position, Vec2Fixed::from_num(4, 0));

    let copy = world.load_agent(red, &save).unwrap();
    assert_eq!(world.agent(copy).unwrap().body.position, Vec2Fixed::from_num(4, 0));
}
