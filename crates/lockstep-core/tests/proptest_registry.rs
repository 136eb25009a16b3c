//! Property tests for the agent registry.
//!
//! Random sequences of creations, teardowns, transfers and ticks are applied
//! to a world; after each sequence the global and local ID tables must agree
//! with each other and with the agents themselves.

use lockstep_core::prelude::*;
use proptest::prelude::*;
use std::collections::BTreeSet;

const CATALOG: &str = r#"{
    "walker": { "kind": "unit", "mover": { "speed": "2" } },
    "ghost": { "kind": "unit", "death_ticks": 3 },
    "rock": { "kind": "unit", "pooled": false }
}"#;

const CODES: [&str; 3] = ["walker", "ghost", "rock"];

#[derive(Debug, Clone)]
enum Op {
    Create { controller: u8, code: usize, x: i32 },
    Deactivate { index: usize, immediate: bool },
    Transfer { index: usize, controller: Option<u8> },
    Advance,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..3u8, 0..3usize, -50..50i32).prop_map(|(controller, code, x)| Op::Create {
            controller,
            code,
            x
        }),
        2 => (0..64usize, any::<bool>()).prop_map(|(index, immediate)| Op::Deactivate {
            index,
            immediate
        }),
        1 => (0..64usize, prop::option::of(0..3u8))
            .prop_map(|(index, controller)| Op::Transfer { index, controller }),
        2 => Just(Op::Advance),
    ]
}

fn setup_world(pooling_enabled: bool) -> World {
    let catalog = AgentCatalog::from_json(CATALOG).unwrap();
    let config = WorldConfig {
        pooling_enabled,
        ..WorldConfig::default()
    };
    let mut world = World::new(catalog, config);
    for name in ["red", "blue", "green"] {
        world.create_controller(name, Allegiance::Enemy).unwrap();
    }
    world
}

/// Apply `ops` and return every handle ever created, in creation order.
fn run(world: &mut World, ops: &[Op]) -> Vec<AgentHandle> {
    let mut created = Vec::new();
    for op in ops {
        match op {
            Op::Create { controller, code, x } => {
                let handle = world
                    .create_agent_facing_right(
                        ControllerId(*controller),
                        CODES[*code],
                        Vec2Fixed::from_num(*x, 0),
                    )
                    .unwrap();
                created.push(handle);
            }
            Op::Deactivate { index, immediate } => {
                if !created.is_empty() {
                    world.request_deactivate(created[index % created.len()], *immediate);
                }
            }
            Op::Transfer { index, controller } => {
                if !created.is_empty() {
                    let handle = created[index % created.len()];
                    // Stale handles are rejected without side effects.
                    let _ = world.change_ownership(handle, controller.map(ControllerId));
                }
            }
            Op::Advance => world.advance(),
        }
    }
    created
}

fn check_tables(world: &World) -> Result<(), TestCaseError> {
    let registry = world.registry();
    let active = registry.active_handles();
    prop_assert_eq!(active.len(), registry.active_count());

    let mut globals = BTreeSet::new();
    let mut locals = BTreeSet::new();
    for handle in &active {
        let agent = registry.get(*handle).unwrap();
        let global_id = agent.global_id().unwrap();
        let local_id = agent.local_id().unwrap();
        let controller = agent.controller().unwrap();

        prop_assert!(globals.insert(global_id), "global id {} issued twice", global_id);
        prop_assert!(
            locals.insert((controller, local_id)),
            "local id {} issued twice under {}",
            local_id,
            controller
        );
        prop_assert!((global_id as usize) < registry.peak_global_id());
        prop_assert_eq!(registry.handle_for_global_id(global_id), Some(*handle));
        prop_assert_eq!(
            registry.get_by_local(controller, local_id).map(Agent::handle),
            Some(*handle)
        );
    }

    let bound: usize = registry.controllers().iter().map(Controller::agent_count).sum();
    prop_assert_eq!(bound, active.len());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Global IDs are unique across the world and local IDs are unique per
    /// controller, whatever happened before.
    #[test]
    fn id_tables_stay_consistent(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut world = setup_world(true);
        run(&mut world, &ops);
        check_tables(&world)?;

        world.advance();
        check_tables(&world)?;
    }

    /// The same operations produce the same handles and the same digest.
    #[test]
    fn registry_is_deterministic(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut first = setup_world(true);
        let mut second = setup_world(true);
        prop_assert_eq!(run(&mut first, &ops), run(&mut second, &ops));
        prop_assert_eq!(first.state_digest(), second.state_digest());
        prop_assert_eq!(first.registry().active_handles(), second.registry().active_handles());
    }

    /// Pooling changes which slots are reused, never which IDs are issued.
    #[test]
    fn pooling_does_not_change_ids(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut pooled = setup_world(true);
        let mut unpooled = setup_world(false);
        run(&mut pooled, &ops);
        run(&mut unpooled, &ops);

        let ids = |world: &World| -> Vec<(Option<ControllerId>, Option<LocalId>, Option<GlobalId>)> {
            world
                .registry()
                .active_handles()
                .into_iter()
                .map(|h| {
                    let agent = world.agent(h).unwrap();
                    (agent.controller(), agent.local_id(), agent.global_id())
                })
                .collect()
        };
        prop_assert_eq!(ids(&pooled), ids(&unpooled));
        prop_assert_eq!(pooled.state_digest(), unpooled.state_digest());
    }

    /// Requesting a teardown twice has the same effect as requesting it once.
    #[test]
    fn deactivation_is_idempotent(count in 1..10usize, repeats in 1..4usize, immediate in any::<bool>()) {
        let mut once = setup_world(true);
        let mut many = setup_world(true);
        for world in [&mut once, &mut many] {
            for i in 0..count {
                world
                    .create_agent_facing_right(ControllerId(0), "walker", Vec2Fixed::from_num(i as i32, 0))
                    .unwrap();
            }
            world.drain_events();
        }

        let target = once.registry().active_handles()[0];
        once.request_deactivate(target, immediate);
        for _ in 0..repeats {
            many.request_deactivate(target, immediate);
        }
        once.advance();
        many.advance();

        prop_assert_eq!(once.drain_events(), many.drain_events());
        prop_assert_eq!(once.registry().active_count(), count - 1);
        prop_assert_eq!(many.registry().active_count(), count - 1);
        prop_assert_eq!(once.state_digest(), many.state_digest());
    }
}
