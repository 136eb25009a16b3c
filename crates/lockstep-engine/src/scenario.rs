//! Scripted scenarios shared by the harness, tests and benchmarks.

use anyhow::Context;
use lockstep_core::prelude::*;

use crate::tick::{TickConfig, TickLoop};

/// Agent templates for the demo scenarios.
pub const DEMO_CATALOG: &str = r#"{
    "worker": {
        "kind": "unit",
        "action_range": "2",
        "mover": { "speed": "4" },
        "construct": { "windup": "0.125" }
    },
    "site": {
        "kind": "structure",
        "structure": { "max_build_points": "3" }
    },
    "hut": {
        "kind": "structure",
        "structure": { "max_build_points": "1" }
    }
}"#;

/// A populated tick loop with a construct command queued for its first tick.
pub struct ConstructDemo {
    pub tick_loop: TickLoop,
    pub red: ControllerId,
    pub blue: ControllerId,
    /// Red's worker, five units away from its site.
    pub worker: AgentHandle,
    pub site: AgentHandle,
}

/// Red gets a worker at the origin and a site at (5, 0); blue gets two
/// workers at y = 4 and two huts further along. Each side's workers are
/// ordered to build their structures.
pub fn construct_demo(world_config: WorldConfig, tick_config: TickConfig) -> anyhow::Result<ConstructDemo> {
    let catalog = AgentCatalog::from_json(DEMO_CATALOG).context("demo catalog is invalid")?;
    let mut world = World::new(catalog, world_config);
    let red = world.create_controller("red", Allegiance::Enemy)?;
    let blue = world.create_controller("blue", Allegiance::Enemy)?;

    let worker = world.create_agent_facing_right(red, "worker", Vec2Fixed::ZERO)?;
    let site = world.create_agent_facing_right(red, "site", Vec2Fixed::from_num(5, 0))?;

    world.create_agent_facing_right(blue, "worker", Vec2Fixed::from_num(0, 4))?;
    world.create_agent_facing_right(blue, "worker", Vec2Fixed::from_num(-1, 4))?;
    let huts = [
        world.create_agent_facing_right(blue, "hut", Vec2Fixed::from_num(3, 4))?,
        world.create_agent_facing_right(blue, "hut", Vec2Fixed::from_num(6, 4))?,
    ];
    world.drain_events();

    let global_id = |world: &World, handle: AgentHandle| -> anyhow::Result<GlobalId> {
        world
            .agent(handle)
            .and_then(Agent::global_id)
            .with_context(|| format!("demo agent {handle:?} has no global ID"))
    };
    let red_build = Command::new(
        red,
        CommandAction::Construct {
            projects: vec![global_id(&world, site)?],
        },
    )
    .with_selection([0]);
    let blue_build = Command::new(
        blue,
        CommandAction::Construct {
            projects: vec![global_id(&world, huts[0])?, global_id(&world, huts[1])?],
        },
    )
    .with_selection([0, 1]);

    let mut tick_loop = TickLoop::new(world, tick_config);
    tick_loop.queue_command(red_build);
    tick_loop.queue_command(blue_build);

    Ok(ConstructDemo {
        tick_loop,
        red,
        blue,
        worker,
        site,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_builds_every_structure() {
        let mut demo = construct_demo(WorldConfig::default(), TickConfig::default()).unwrap();
        assert_eq!(demo.tick_loop.pending_commands().len(), 2);
        demo.tick_loop.run_ticks(200);

        let world = demo.tick_loop.world();
        for handle in world.registry().active_handles() {
            let agent = world.agent(handle).unwrap();
            if let Some(structure) = &agent.structure {
                assert!(!structure.needs_construction(), "{handle:?} unfinished");
            }
            assert_eq!(agent.tag, AgentTag::None);
        }
        assert!(world.groups().is_empty());
    }
}
