use std::collections::VecDeque;

use log::{info, warn};
use serde::Serialize;

use crate::memsys::{
    Completion, HierarchyKind, LineSnapshot, LookupStatus, MemorySystem, Request, ShootdownOutcome,
    SystemConfig,
};
use crate::sim::config::{ScriptAction, ScriptedAccess, SimConfig};

#[derive(Debug, Clone, Serialize)]
pub struct IssueRecord {
    pub id: u64,
    pub cycle: u64,
    pub core: usize,
    pub status: LookupStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheContents {
    pub name: String,
    pub lines: Vec<LineSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub cycles: u64,
    pub timed_out: bool,
    pub retries: u64,
    pub issues: Vec<IssueRecord>,
    pub completions: Vec<Completion>,
    pub shootdowns: Vec<ShootdownOutcome>,
    pub contents: Vec<CacheContents>,
}

/// Replays a scripted access stream against a memory system, re-issuing whatever came back
/// `Retry` on the next cycle.
pub struct Sim {
    config: SimConfig,
    system: MemorySystem,
    script: VecDeque<ScriptedAccess>,
    stalled: VecDeque<(u64, ScriptedAccess)>,
    cycle: u64,
    next_id: u64,
    report: RunReport,
}

impl Sim {
    pub fn new(config: SimConfig, system_config: SystemConfig) -> Self {
        Self::with_system(config, MemorySystem::new(system_config))
    }

    pub fn with_system(config: SimConfig, system: MemorySystem) -> Self {
        let mut script: Vec<ScriptedAccess> = config.script.clone();
        script.sort_by_key(|entry| entry.cycle);
        for entry in &script {
            assert!(
                entry.core < system.num_cores(),
                "script entry for core {} but only {} cores",
                entry.core,
                system.num_cores()
            );
        }
        Self {
            config,
            system,
            script: script.into(),
            stalled: VecDeque::new(),
            cycle: 0,
            next_id: 1,
            report: RunReport {
                cycles: 0,
                timed_out: false,
                retries: 0,
                issues: Vec::new(),
                completions: Vec::new(),
                shootdowns: Vec::new(),
                contents: Vec::new(),
            },
        }
    }

    pub fn system(&self) -> &MemorySystem {
        &self.system
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn finished(&self) -> bool {
        self.script.is_empty() && self.stalled.is_empty() && self.system.is_done()
    }

    pub fn tick_one(&mut self) {
        let stalled = std::mem::take(&mut self.stalled);
        for (id, entry) in stalled {
            self.replay(id, entry);
        }
        while self.script.front().is_some_and(|entry| entry.cycle <= self.cycle) {
            if let Some(entry) = self.script.pop_front() {
                let id = self.next_id;
                self.next_id += 1;
                self.replay(id, entry);
            }
        }

        self.system.tick();
        for core in 0..self.system.num_cores() {
            while let Some(completion) = self.system.pop_completion(core) {
                self.report.completions.push(completion);
            }
        }
        self.cycle += 1;
    }

    fn replay(&mut self, id: u64, entry: ScriptedAccess) {
        match entry.action {
            ScriptAction::Access => {
                let request =
                    Request::new(entry.addr, entry.kind, entry.thread, entry.large, entry.core).with_id(id);
                let status = match entry.hierarchy {
                    Some(kind) => self.system.issue_to(kind, entry.core, request),
                    None => self.system.issue(entry.core, request),
                };
                if status == LookupStatus::Retry {
                    self.report.retries += 1;
                    self.stalled.push_back((id, entry));
                    return;
                }
                self.report.issues.push(IssueRecord {
                    id,
                    cycle: self.cycle,
                    core: entry.core,
                    status,
                });
            }
            ScriptAction::Shootdown => {
                let outcome = self.system.shootdown(entry.core, entry.addr, entry.thread, entry.large);
                self.report.shootdowns.push(outcome);
            }
            ScriptAction::TlbInvalidate => {
                self.system.tlb_invalidate(entry.core, entry.addr, entry.thread, entry.large);
            }
            ScriptAction::Flush => {
                let is_translation = entry.hierarchy == Some(HierarchyKind::Translation)
                    || entry.kind.is_translation();
                self.system.clflush(entry.core, entry.addr, entry.thread, is_translation);
            }
        }
    }

    pub fn simulate(mut self) -> RunReport {
        info!("replaying {} scripted accesses", self.script.len());
        while !self.finished() {
            if self.cycle >= self.config.timeout {
                warn!("timed out after {} cycles", self.cycle);
                self.report.timed_out = true;
                break;
            }
            self.tick_one();
        }
        info!(
            "finished at cycle {} with {} completions",
            self.cycle,
            self.report.completions.len()
        );

        self.report.cycles = self.cycle;
        if self.config.dump_contents {
            self.report.contents = (0..self.system.topology().len())
                .map(|id| CacheContents {
                    name: self.system.cache(id).name().to_string(),
                    lines: self.system.resident_lines(id),
                })
                .collect();
        }
        self.report
    }
}
