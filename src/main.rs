mod clock;
mod coordinator;
mod error;
mod mutex;

use std::env;
use std::process;
use std::sync::Arc;

use rand::Rng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use coordinator::{CoordinatorConfig, OpKind, ResourceCoordinator};
use mutex::{CsLifecycle, CsState, MutexEngine, NodeId, RaNetwork, RequestId};

const DEFAULT_NODES: usize = 3;
const DEFAULT_ROUNDS: usize = 5;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        None => run_demo(DEFAULT_NODES, DEFAULT_ROUNDS),
        Some("demo") => {
            let nodes = parse_arg(args.get(2), DEFAULT_NODES, "nodes");
            let rounds = parse_arg(args.get(3), DEFAULT_ROUNDS, "rounds");
            if nodes == 0 || rounds == 0 {
                eprintln!("nodes and rounds must both be at least 1");
                process::exit(1);
            }
            run_demo(nodes, rounds);
        }
        Some(_) => {
            print_usage();
            process::exit(1);
        }
    }
}

fn print_usage() {
    eprintln!("Usage: exclave [command]");
    eprintln!("Commands:");
    eprintln!("  demo [nodes] [rounds] - Run the contention demo (default 3 nodes, 5 rounds)");
    eprintln!("  (none)                - Same as 'demo'");
}

fn parse_arg(arg: Option<&String>, default: usize, name: &str) -> usize {
    match arg {
        None => default,
        Some(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                eprintln!("invalid {}: {}", name, raw);
                process::exit(1);
            }
        },
    }
}

/// Lifecycle adapter performing one random bank transaction per CS entry.
struct Teller {
    node_id: NodeId,
    coordinator: Arc<ResourceCoordinator>,
}

impl CsLifecycle for Teller {
    fn on_enter_cs(&mut self, request_id: RequestId) {
        if !self.coordinator.acquire(&self.node_id, request_id) {
            // The arbiter saw another holder and has already recorded the
            // violation. Skip the transaction, keep the protocol moving.
            warn!(node = %self.node_id, "arbiter denied access, skipping transaction");
            return;
        }

        let mut rng = rand::thread_rng();
        let amount = rng.gen_range(50..500);
        let op = if rng.gen_bool(0.5) {
            OpKind::Withdraw
        } else {
            OpKind::Deposit
        };
        let result = self.coordinator.mutate(&self.node_id, request_id, op, amount);
        info!(node = %self.node_id, outcome = %result.message, "transaction");
    }

    fn on_exit_cs(&mut self, request_id: RequestId) {
        self.coordinator.release(&self.node_id, request_id);
    }
}

/// Run `rounds` rounds of all-against-all contention over a shared account.
fn run_demo(nodes: usize, rounds: usize) {
    let coordinator = Arc::new(ResourceCoordinator::new(CoordinatorConfig::default()));
    let ids: Vec<NodeId> = (1..=nodes).map(|i| format!("node-{:02}", i)).collect();

    let mut network = RaNetwork::new(ids.iter().cloned());
    let mut engines: Vec<MutexEngine<Teller>> = ids
        .iter()
        .map(|id| {
            let endpoint = network
                .endpoint(id)
                .unwrap_or_else(|| panic!("endpoint for {} taken twice", id));
            let teller = Teller {
                node_id: id.clone(),
                coordinator: coordinator.clone(),
            };
            let mut engine = MutexEngine::new(id.clone(), endpoint, teller);
            for peer in &ids {
                if peer != id {
                    engine.register_peer(peer.clone());
                }
            }
            engine
        })
        .collect();

    info!(nodes, rounds, "starting contention demo");

    for round in 1..=rounds {
        for engine in &mut engines {
            if let Err(e) = engine.request_entry() {
                warn!(node = %engine.node_id(), %e, "request failed");
            }
        }

        // Pump message queues until every node has entered and released.
        loop {
            let mut progressed = false;
            for engine in &mut engines {
                progressed |= engine.process_all() > 0;
                if engine.in_cs() {
                    if let Err(e) = engine.release_entry() {
                        warn!(node = %engine.node_id(), %e, "release failed");
                    }
                    progressed = true;
                }
            }
            let all_idle = engines.iter().all(|e| e.cs_state() == CsState::Idle);
            if all_idle && !progressed {
                break;
            }
        }
        info!(round, balance = coordinator.balance(), "round complete");
    }

    print_report(&coordinator, nodes, rounds);
}

fn print_report(coordinator: &ResourceCoordinator, nodes: usize, rounds: usize) {
    let snapshot = coordinator.snapshot();

    println!();
    println!("=== Demo report: {} nodes x {} rounds ===", nodes, rounds);
    println!("Final balance:    {}", snapshot.balance);
    println!("Total accesses:   {}", snapshot.total_accesses);
    println!("Average hold:     {:.1}ms", snapshot.average_hold_ms);
    println!(
        "Arbiter traffic:  {} attempts, {} grants, {} denials, {} releases, {} mutations",
        snapshot.metrics.acquire_attempts,
        snapshot.metrics.grants,
        snapshot.metrics.denials,
        snapshot.metrics.releases,
        snapshot.metrics.mutations,
    );

    if snapshot.violations.is_empty() {
        println!("Violations:       none");
    } else {
        println!("Violations:       {} (!)", snapshot.violations.len());
        for violation in &snapshot.violations {
            println!(
                "  [{:?}] {}: {}",
                violation.kind, violation.node_id, violation.detail
            );
        }
    }

    println!("Transactions:");
    for entry in snapshot.history.iter().filter(|e| e.op.is_some()) {
        if let Some(op) = entry.op.as_ref() {
            println!(
                "  {} {:?} {:>5} -> balance {:>7} ({})",
                entry.node_id,
                op.kind,
                op.amount,
                op.resulting_balance,
                if op.success { "ok" } else { "failed" },
            );
        }
    }
}
