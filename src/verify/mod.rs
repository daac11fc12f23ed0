//! # Integrity Verifier
//!
//! Traverses every page of one or more trees, validates the structure of
//! each page and the relationships between pages, and records every
//! inconsistency as a [`Fault`]. Optionally prunes multi-version values and
//! enqueues index-hole repairs while it walks.
//!
//! ## Traversal
//!
//! A recursive pre-order walk keyed by level. For every level the verifier
//! keeps an edge: the most recently visited page at that level, its claim,
//! and the last key seen on it. Before descending from a parent to child C,
//! the previous edge at the child's level is reconciled by walking right
//! sibling pointers until C is reached; every page crossed on the way is an
//! index hole (reachable laterally but missing from the level above).
//!
//! Claims are taken top-down and released in strict edge-array order: the
//! page at level L stays claimed while level L-1 is being visited and is
//! released when the walk returns to L. Buffers are moved into the edge
//! array and dropped from it, so ownership of each claim is explicit.
//!
//! ## Dedup and Accounting
//!
//! A 64-bit page bitset flags every page touched. A page reached twice is a
//! "more than one parent" fault. After the trees, the garbage chain is
//! walked: every garbage page and every page of each free run must be absent
//! from the bitset. Counter accumulation continues even after `MAX_FAULTS`
//! is reached so the totals stay meaningful.
//!
//! ## Interlocks
//!
//! With pruning enabled the verifier claims pages exclusively and invokes
//! the value-layer prune on each page carrying multi-version values, after
//! that page verified clean. The optional prune-and-clear pass additionally
//! resets the transaction index's per-version bookkeeping, and is only legal
//! when every tree was selected.
//!
//! The walk is cooperative: a shared stop flag is checked at every page
//! visit, and partial results stay valid after a stop.

pub mod counters;
pub mod fault;

pub use counters::{CSV_HEADERS, Counters};
pub use fault::Fault;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use eyre::{Result, ensure};
use roaring::RoaringTreemap;
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::config::{
    MAX_FAULTS, MAX_HOLES_TO_FIX, MAX_PRUNING_ERRORS, MAX_TREE_DEPTH, MAX_VALID_PAGE_ADDR,
    MAX_WALK_RIGHT, PAGE_HEADER_SIZE, SETTLE_INTERVAL_MS,
};
use crate::error::ErrorKind;
use crate::mvcc::{self, TransactionIndex};
use crate::page::codec::{KeyedPage, KeyedPageMut};
use crate::page::long_record::LongRecord;
use crate::page::verify::{PageFault, VerifyVisitor, verify_page};
use crate::page::{GarbagePage, PageType};
use crate::pool::{Buffer, CleanupQueue, IndexHole};
use crate::tree::Tree;
use crate::volume::Volume;

/// Behavior switches, mirroring the `icheck` flag surface.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Freeze updates for the duration of the run (default on).
    pub suspend_updates: bool,
    /// Offer accumulated index holes to the cleanup queue.
    pub fix_holes: bool,
    /// Prune multi-version values on writable volumes.
    pub prune: bool,
    /// Prune and, after a fully clean run, clear the transaction index.
    pub prune_and_clear: bool,
    pub verbose: bool,
    pub csv: bool,
    /// How long to wait after suspending updates before touching pages.
    pub settle: Duration,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            suspend_updates: true,
            fix_holes: false,
            prune: false,
            prune_and_clear: false,
            verbose: false,
            csv: false,
            settle: Duration::from_millis(SETTLE_INTERVAL_MS),
        }
    }
}

/// One volume's worth of work for [`IntegrityCheck::run`].
pub struct VolumePlan<'v> {
    pub volume: &'v Volume,
    /// Check the whole volume (directory tree, every named tree, garbage).
    pub whole_volume: bool,
    /// Trees to check when not checking the whole volume.
    pub trees: Vec<Tree>,
}

struct Edge {
    buffer: Option<Buffer>,
    page: u64,
    /// Last key seen on the page, for sibling reconciliation.
    key: Vec<u8>,
}

impl Edge {
    fn empty() -> Self {
        Self { buffer: None, page: 0, key: Vec::new() }
    }
}

/// Per-page visitor accumulating multi-version statistics.
#[derive(Default)]
struct MvvCollector {
    records: u64,
    overhead: u64,
    anti_values: u64,
}

impl VerifyVisitor for MvvCollector {
    fn data_record(&mut self, _key: &[u8], _slot: usize, value: &[u8]) -> Result<()> {
        if !mvcc::value::is_primordial(value) {
            let summary = mvcc::value::summarize(value)?;
            if summary.version_count > 0 {
                self.records += 1;
                self.overhead += summary.overhead() as u64;
                if summary.newest_is_anti {
                    self.anti_values += 1;
                }
            }
        }
        Ok(())
    }
}

pub struct IntegrityCheck<'e> {
    txn_index: &'e dyn TransactionIndex,
    cleanup: Option<&'e dyn CleanupQueue>,
    options: VerifyOptions,
    should_stop: Arc<AtomicBool>,
    stopped: bool,

    used_pages: RoaringTreemap,
    total_pages: u64,
    pages_visited: u64,
    /// Pages reached through tree structure, captured before the garbage
    /// chain is walked.
    tree_page_count: u64,

    counters: Counters,
    edges: Vec<Edge>,
    tree_depth: usize,
    current_resource: String,

    faults: Vec<Fault>,
    holes: Vec<IndexHole>,
    prune_floor: Option<u64>,
    output: Vec<String>,
}

impl<'e> IntegrityCheck<'e> {
    pub fn new(txn_index: &'e dyn TransactionIndex, options: VerifyOptions) -> Self {
        Self {
            txn_index,
            cleanup: None,
            options,
            should_stop: Arc::new(AtomicBool::new(false)),
            stopped: false,
            used_pages: RoaringTreemap::new(),
            total_pages: 0,
            pages_visited: 0,
            tree_page_count: 0,
            counters: Counters::default(),
            edges: (0..MAX_TREE_DEPTH).map(|_| Edge::empty()).collect(),
            tree_depth: 0,
            current_resource: String::new(),
            faults: Vec::new(),
            holes: Vec::new(),
            prune_floor: None,
            output: Vec::new(),
        }
    }

    pub fn with_cleanup(mut self, cleanup: &'e dyn CleanupQueue) -> Self {
        self.cleanup = Some(cleanup);
        self
    }

    /// Shared flag that cancels the walk at the next page boundary.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.should_stop)
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn faults(&self) -> &[Fault] {
        &self.faults
    }

    pub fn has_faults(&self) -> bool {
        !self.faults.is_empty()
    }

    pub fn index_hole_count(&self) -> u64 {
        self.counters.index_hole_count
    }

    /// Pages reached through tree structure (set once per volume check).
    pub fn tree_page_count(&self) -> u64 {
        self.tree_page_count
    }

    pub fn garbage_page_count(&self) -> u64 {
        self.counters.garbage_page_count
    }

    /// Collected log lines, in emission order.
    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn progress(&self) -> f64 {
        if self.total_pages == 0 {
            1.0
        } else {
            self.pages_visited as f64 / self.total_pages as f64
        }
    }

    pub fn status(&self) -> String {
        format!("{}/{} ({})", self.pages_visited, self.total_pages, self.current_resource)
    }

    /// Run a set of volume plans with the configured interlocks: the
    /// prune-and-clear precondition, update suspension with its settle wait,
    /// per-resource summaries, and the transaction-index clearing pass.
    pub fn run(&mut self, plans: &[VolumePlan<'_>], select_all: bool) -> Result<()> {
        ensure!(
            !self.options.prune_and_clear || select_all,
            ErrorKind::StateViolation(
                "prune-and-clear requires all trees (trees=*) to be selected".to_string()
            )
        );
        if self.options.csv {
            self.post(format!("Volume,Tree,Faults,{}", CSV_HEADERS));
        }

        let frozen: Vec<_> = if self.options.suspend_updates {
            plans
                .iter()
                .map(|plan| Arc::clone(plan.volume.suspension()))
                .inspect(|suspension| suspension.suspend())
                .collect()
        } else {
            Vec::new()
        };
        if !frozen.is_empty() {
            std::thread::sleep(self.options.settle);
        }

        let result = self.run_inner(plans);

        for suspension in frozen {
            suspension.resume();
        }
        result
    }

    fn run_inner(&mut self, plans: &[VolumePlan<'_>]) -> Result<()> {
        for plan in plans {
            self.prune_floor = Some(plan.volume.timestamps().update());
            if plan.whole_volume {
                if let Err(e) = self.check_volume(plan.volume) {
                    self.post(e.to_string());
                }
            } else {
                self.reset_per_volume();
                for tree in &plan.trees {
                    if let Err(e) = self.check_tree(plan.volume, tree) {
                        self.post(e.to_string());
                    }
                }
            }
            if self.stopped {
                break;
            }
        }

        let faults = self.faults.len();
        if self.options.csv {
            self.post(format!("\"*\",\"*\",{},{}", faults, self.counters.to_csv()));
        } else {
            self.post(format!("Total Faults:{} {}", faults, self.counters));
        }

        if self.options.prune_and_clear {
            if self.faults.is_empty()
                && self.counters.mvv_page_count == self.counters.pruned_page_count
                && self.counters.pruning_error_count == 0
            {
                let since = self.prune_floor.unwrap_or(0);
                let cleared = self.txn_index.reset_mvv_counts(since);
                self.post(format!("{} aborted transactions were cleared by pruning", cleared));
            } else {
                self.post("PruneAndClear failed to remove all aborted MVVs".to_string());
            }
        }
        Ok(())
    }

    /// Check one whole volume: the directory tree, every named tree, then
    /// the garbage chain. Returns whether the volume is clean.
    pub fn check_volume(&mut self, volume: &Volume) -> Result<bool> {
        self.reset_per_volume();
        let head = volume.head()?;
        self.total_pages = head.next_available;
        self.current_resource = volume.name().to_string();
        let faults_before = self.faults.len();
        let snapshot = self.counters.snapshot();
        if !self.options.csv {
            self.post(format!("Volume {} - checking", volume.name()));
        }

        let directory = volume.directory_tree()?;
        self.check_tree(volume, &directory)?;
        for name in volume.tree_names()? {
            if self.stopped {
                break;
            }
            if let Some(tree) = volume.get_tree(&name)? {
                self.check_tree(volume, &tree)?;
            }
        }
        self.tree_page_count = self.used_pages.len();
        self.check_garbage(volume, head.garbage_root)?;

        let faults = self.faults.len() - faults_before;
        let mut delta = snapshot;
        delta.difference(&self.counters);
        if self.options.csv {
            self.post(format!("\"{}\",\"*\",{},{}", volume.name(), faults, delta.to_csv()));
        } else {
            self.post(format!("Volume {} Faults:{} {}", volume.name(), faults, delta));
        }
        Ok(faults == 0)
    }

    /// Check a single tree. Returns whether the tree is clean.
    pub fn check_tree(&mut self, volume: &Volume, tree: &Tree) -> Result<bool> {
        let lock = volume.tree_lock(&tree.name);
        let claim = lock.try_write_for(Duration::from_secs(10)).ok_or_else(|| {
            eyre::Report::new(ErrorKind::InUse(format!(
                "unable to acquire a claim on tree {}",
                tree.name
            )))
        })?;

        if self.total_pages == 0 {
            self.total_pages = volume.head()?.next_available;
        }
        if self.prune_floor.is_none() {
            self.prune_floor = Some(volume.timestamps().update());
        }
        self.current_resource = tree.resource_name(volume);
        self.tree_depth = tree.depth;
        if tree.depth == 0 || tree.depth > MAX_TREE_DEPTH {
            self.add_fault(format!("Tree depth {} is invalid", tree.depth), tree.root, 0, 0);
            return Ok(false);
        }
        self.holes.clear();
        for edge in &mut self.edges {
            *edge = Edge::empty();
        }
        let faults_before = self.faults.len();
        let snapshot = self.counters.snapshot();

        let walk = self.walk_tree(volume, tree, &[], 0, tree.root, tree.depth - 1);
        for edge in &mut self.edges {
            *edge = Edge::empty();
        }
        drop(claim);
        walk?;

        if !self.holes.is_empty() {
            self.post(format!(
                "  Tree {} has {} unindexed page{}",
                self.current_resource,
                self.holes.len(),
                if self.holes.len() == 1 { "" } else { "s" }
            ));
            if self.options.fix_holes {
                if let Some(cleanup) = self.cleanup {
                    let offered = self.holes.iter().filter(|hole| cleanup.offer(**hole)).count();
                    self.post(format!("    - enqueued {} for repair", offered));
                }
            }
        }

        let faults = self.faults.len() - faults_before;
        let mut delta = snapshot;
        delta.difference(&self.counters);
        if self.options.csv {
            self.post(format!(
                "\"{}\",\"{}\",{},{}",
                volume.name(),
                tree.name,
                faults,
                delta.to_csv()
            ));
        } else if self.options.verbose {
            self.post(format!("  Tree {} - Faults:{} {}", self.current_resource, faults, delta));
        }
        Ok(faults == 0)
    }

    fn reset_per_volume(&mut self) {
        self.used_pages = RoaringTreemap::new();
        self.total_pages = 0;
        self.pages_visited = 0;
        self.tree_page_count = 0;
    }

    fn cancelled(&mut self) -> bool {
        if !self.stopped && self.should_stop.load(Ordering::Relaxed) {
            self.stopped = true;
            debug!(resource = %self.current_resource, "integrity check cancelled");
        }
        self.stopped
    }

    fn get_page(&self, volume: &Volume, page: u64) -> Result<Buffer> {
        let for_write = self.options.prune && !volume.is_read_only();
        volume.pool().get(page, for_write, true)
    }

    fn add_fault(&mut self, description: impl Into<String>, page: u64, level: usize, position: usize) {
        let description = description.into();
        let mut path: SmallVec<[u64; MAX_TREE_DEPTH]> = SmallVec::new();
        for l in ((level + 1)..self.tree_depth.min(MAX_TREE_DEPTH)).rev() {
            if self.edges[l].page != 0 {
                path.push(self.edges[l].page);
            }
        }
        path.push(page);
        let fault = Fault {
            resource_name: self.current_resource.clone(),
            description,
            path,
            level,
            depth: self.tree_depth,
            position,
        };
        warn!(fault = %fault, "integrity fault");
        if self.options.verbose {
            self.output.push(fault.to_string());
        }
        if self.faults.len() < MAX_FAULTS {
            self.faults.push(fault);
        }
    }

    fn post(&mut self, message: String) {
        debug!("{}", message);
        self.output.push(message);
    }

    /// Visit the subtree rooted at `page`, reached from `parent` through a
    /// keyblock carrying `parent_key`.
    fn walk_tree(
        &mut self,
        volume: &Volume,
        tree: &Tree,
        parent_key: &[u8],
        parent: u64,
        page: u64,
        level: usize,
    ) -> Result<()> {
        if self.cancelled() {
            return Ok(());
        }
        if level >= MAX_TREE_DEPTH {
            self.add_fault("Tree is too deep", page, level.min(MAX_TREE_DEPTH - 1), 0);
            return Ok(());
        }
        if page == 0 {
            self.add_fault("Page 0 not allowed in tree structure", page, level, 0);
            return Ok(());
        }
        if self.used_pages.contains(page) {
            self.add_fault("Page has more than one parent", page, level, 0);
            return Ok(());
        }
        self.used_pages.insert(page);

        let mut buffer = match self.get_page(volume, page) {
            Ok(buffer) => buffer,
            Err(e) => {
                self.add_fault(format!("Unable to read page: {}", e), page, level, 0);
                return Ok(());
            }
        };
        self.pages_visited += 1;

        let header_facts = {
            let header = buffer.header()?;
            (header.page_type(), header.right_sibling())
        };
        if parent == 0 && header_facts.1 != 0 {
            self.add_fault("Tree root has a right sibling", page, level, 0);
        }

        // Reconcile the previous page at this level with this one.
        if self.edges[level].buffer.is_some() {
            if let Some(final_key) = self.walk_right(volume, tree, level, page)? {
                if !parent_key.is_empty() && final_key.as_slice() >= parent_key {
                    self.add_fault(
                        "left sibling final key is not less than parent key",
                        page,
                        level,
                        0,
                    );
                }
            }
        }

        if header_facts.0 != PageType::for_level(level) {
            self.add_fault(
                format!("Unexpected page type {} at level {}", header_facts.0, level),
                page,
                level,
                0,
            );
            self.edges[level] = Edge { buffer: Some(buffer), page, key: parent_key.to_vec() };
            return Ok(());
        }

        let mut collector = MvvCollector::default();
        if let Some(page_fault) = verify_page(buffer.bytes(), None, &mut collector)? {
            let PageFault { description, position } = page_fault;
            self.add_fault(description, page, level, position);
            self.edges[level] = Edge { buffer: Some(buffer), page, key: parent_key.to_vec() };
            return Ok(());
        }

        // I1: the first key of this page must be at or above the key that
        // led here.
        {
            let view = KeyedPage::read(buffer.bytes())?;
            if view.keyblock_count() > 0 && !parent_key.is_empty() {
                let first_key = view.key_at(0)?;
                if first_key.as_slice() < parent_key {
                    self.add_fault("first key on page is less than parent key", page, level, 0);
                }
            }
        }

        if collector.records > 0 {
            self.counters.mvv_page_count += 1;
            self.counters.mvv_count += collector.records;
            self.counters.mvv_overhead += collector.overhead;
            self.counters.mvv_anti_value_count += collector.anti_values;
            if self.options.prune
                && !volume.is_read_only()
                && self.counters.pruning_error_count < MAX_PRUNING_ERRORS as u64
            {
                match self.prune_page(&mut buffer) {
                    Ok(()) => self.counters.pruned_page_count += 1,
                    Err(e) => {
                        debug!(page, error = %e, "pruning failed");
                        self.counters.pruning_error_count += 1;
                    }
                }
            }
        }

        // Occupancy, the edge key, and the child list all reflect the page
        // as it stands after any pruning.
        let view = KeyedPage::read(buffer.bytes())?;
        let record_count = view.keyblock_count();
        let last_key = if record_count > 0 { view.key_at(record_count - 1)? } else { parent_key.to_vec() };
        let bytes_in_use = view.bytes_in_use()? as u64;

        match header_facts.0 {
            PageType::Data => {
                self.counters.data_page_count += 1;
                self.counters.data_bytes_in_use += bytes_in_use;
                let mut long_records = Vec::new();
                let mut slot = 0;
                while let Some((at, descriptor)) = view.next_long_record(slot)? {
                    long_records.push((at, descriptor));
                    slot = at + 1;
                }
                self.edges[level] = Edge { buffer: Some(buffer), page, key: last_key };
                for (slot, descriptor) in long_records {
                    self.check_long_record(volume, &descriptor, page, slot)?;
                }
            }
            PageType::Index(_) => {
                self.counters.index_page_count += 1;
                self.counters.index_bytes_in_use += bytes_in_use;
                let mut children = Vec::with_capacity(record_count);
                let mut key = Vec::new();
                for slot in 0..record_count {
                    view.next_key(slot, &mut key)?;
                    match view.child_at(slot) {
                        Ok(child) => children.push((key.clone(), child)),
                        Err(e) => self.add_fault(e.to_string(), page, level, slot),
                    }
                }
                self.edges[level] = Edge { buffer: Some(buffer), page, key: last_key };
                for (child_key, child) in children {
                    if self.cancelled() {
                        return Ok(());
                    }
                    if child == 0 || child > MAX_VALID_PAGE_ADDR {
                        self.add_fault(
                            format!("Invalid index pointer value {}", child),
                            page,
                            level,
                            0,
                        );
                        continue;
                    }
                    self.walk_tree(volume, tree, &child_key, page, child, level - 1)?;
                }
            }
            other => {
                // Unreachable after the type check above; kept as a guard.
                self.add_fault(format!("Unhandled page type {}", other), page, level, 0);
            }
        }
        Ok(())
    }

    /// Follow right siblings from the previous edge at `level` until
    /// `to_page`, counting every crossed page as an index hole. Returns the
    /// last key of the page immediately left of `to_page`.
    fn walk_right(
        &mut self,
        volume: &Volume,
        tree: &Tree,
        level: usize,
        to_page: u64,
    ) -> Result<Option<Vec<u8>>> {
        let Some(start) = self.edges[level].buffer.take() else {
            return Ok(None);
        };
        let start_page = start.page_address();
        if start_page == to_page {
            self.add_fault("Overlapping page", to_page, level, 0);
            return Ok(None);
        }
        let mut current = start;
        let mut final_key = std::mem::take(&mut self.edges[level].key);
        let mut walk_count = MAX_WALK_RIGHT;
        loop {
            let next = current.header()?.right_sibling();
            if next == to_page {
                break;
            }
            if next == start_page {
                self.add_fault("Right pointer cycle", next, level, 0);
                return Ok(None);
            }
            self.counters.index_hole_count += 1;
            if self.holes.len() < MAX_HOLES_TO_FIX {
                self.holes.push(IndexHole { tree_handle: tree.handle, page_address: next, level });
            }
            if next == 0 || next > MAX_VALID_PAGE_ADDR {
                self.add_fault("Invalid right sibling address", current.page_address(), level, 0);
                return Ok(None);
            }
            if walk_count == 0 {
                self.add_fault(
                    format!("More than {} unindexed siblings", MAX_WALK_RIGHT),
                    next,
                    level,
                    0,
                );
                return Ok(None);
            }
            walk_count -= 1;

            if self.used_pages.contains(next) {
                self.add_fault("Page has more than one parent", next, level, 0);
                return Ok(None);
            }
            self.used_pages.insert(next);
            let buffer = match self.get_page(volume, next) {
                Ok(buffer) => buffer,
                Err(e) => {
                    self.add_fault(format!("Unable to read page: {}", e), next, level, 0);
                    return Ok(None);
                }
            };
            self.pages_visited += 1;
            let mut collector = MvvCollector::default();
            if let Some(page_fault) = verify_page(buffer.bytes(), Some(PageType::for_level(level)), &mut collector)? {
                self.add_fault(page_fault.description, next, level, page_fault.position);
                return Ok(None);
            }
            let view = KeyedPage::read(buffer.bytes())?;
            if view.keyblock_count() > 0 {
                final_key = view.key_at(view.keyblock_count() - 1)?;
            }
            current = buffer;
        }
        Ok(Some(final_key))
    }

    /// Chase a long-record chain, marking pages used and checking that the
    /// chain carries exactly the bytes the descriptor promises.
    fn check_long_record(
        &mut self,
        volume: &Volume,
        descriptor: &LongRecord,
        page: u64,
        position: usize,
    ) -> Result<()> {
        if let Err(e) = descriptor.validate() {
            self.add_fault(e.to_string(), page, 0, position);
            return Ok(());
        }
        let per_page = (volume.page_size() - PAGE_HEADER_SIZE) as u64;
        let mut remaining = descriptor.chain_size() as i64;
        let mut from_page = page;
        let mut long_page = descriptor.first_page;
        while long_page != 0 {
            if self.used_pages.contains(long_page) {
                self.add_fault(
                    format!("Long record page {} is multiply linked", long_page),
                    page,
                    0,
                    position,
                );
                return Ok(());
            }
            self.used_pages.insert(long_page);
            if remaining <= 0 {
                self.add_fault(
                    format!("Long record chain too long at page {} pointed to by {}", long_page, from_page),
                    page,
                    0,
                    position,
                );
                return Ok(());
            }
            let buffer = match self.get_page(volume, long_page) {
                Ok(buffer) => buffer,
                Err(e) => {
                    self.add_fault(format!("Unable to read page: {}", e), long_page, 0, position);
                    return Ok(());
                }
            };
            let header = buffer.header()?;
            if header.page_type() != PageType::LongRecord {
                self.add_fault(
                    format!("Invalid long record page {}: type={}", long_page, header.page_type()),
                    page,
                    0,
                    position,
                );
                return Ok(());
            }
            let segment = (remaining as u64).min(per_page);
            remaining -= segment as i64;
            self.counters.long_record_bytes_in_use += segment;
            self.counters.long_record_page_count += 1;
            from_page = long_page;
            long_page = header.right_sibling();
        }
        if remaining > 0 {
            self.add_fault(
                format!("Long record chain ends {} bytes early", remaining),
                page,
                0,
                position,
            );
        }
        Ok(())
    }

    /// Prune every multi-version record on the page. The buffer holds an
    /// exclusive claim (the verifier claims for write whenever pruning is
    /// enabled).
    fn prune_page(&mut self, buffer: &mut Buffer) -> Result<()> {
        let floor = self.prune_floor.unwrap_or(0);
        let bytes = buffer.bytes_mut()?;
        let mut page = KeyedPageMut::write(bytes)?;
        // Walk backward so removals do not disturb slots yet to visit.
        for slot in (0..page.as_read().keyblock_count()).rev() {
            let value = page.as_read().value_at(slot)?.to_vec();
            if mvcc::value::is_primordial(&value) {
                continue;
            }
            match mvcc::prune(&value, self.txn_index, floor)? {
                mvcc::Pruned::Unchanged => {}
                mvcc::Pruned::Rewritten(region) => {
                    ensure!(
                        page.replace_value(slot, &region)?
                            == crate::page::codec::InsertOutcome::Done,
                        "pruned region did not fit in place"
                    );
                }
                mvcc::Pruned::RemoveKey => {
                    page.remove(slot)?;
                }
            }
        }
        Ok(())
    }

    /// Walk the volume's garbage chain: each garbage page and every page of
    /// each free run must be disjoint from the tree-reachable set.
    fn check_garbage(&mut self, volume: &Volume, garbage_root: u64) -> Result<()> {
        self.current_resource = volume.name().to_string();
        self.tree_depth = 0;
        let mut garbage_address = garbage_root;
        while garbage_address != 0 {
            if self.cancelled() {
                return Ok(());
            }
            let buffer = match self.get_page(volume, garbage_address) {
                Ok(buffer) => buffer,
                Err(e) => {
                    self.add_fault(format!("Unable to read page: {}", e), garbage_address, 0, 0);
                    return Ok(());
                }
            };
            self.pages_visited += 1;
            let header = buffer.header()?;
            if header.page_type() != PageType::Garbage {
                self.add_fault(
                    format!("Unexpected page type {} expected a garbage page", header.page_type()),
                    garbage_address,
                    0,
                    0,
                );
                return Ok(());
            }
            if self.used_pages.contains(garbage_address) {
                self.add_fault("Garbage page is referenced by multiple parents", garbage_address, 0, 0);
                return Ok(());
            }
            self.used_pages.insert(garbage_address);
            self.counters.garbage_page_count += 1;

            let garbage = GarbagePage::read(buffer.bytes())?;
            if !garbage.is_well_formed() {
                self.add_fault(
                    format!(
                        "Garbage page is malformed: alloc={} is not at an entry boundary",
                        garbage.header().alloc()
                    ),
                    garbage_address,
                    0,
                    0,
                );
            }
            let entries: Vec<_> = garbage.entries().collect();
            let next = garbage.header().right_sibling();
            drop(buffer);
            for entry in entries {
                self.check_garbage_chain(volume, entry.left_page, entry.right_page)?;
            }
            garbage_address = next;
        }
        Ok(())
    }

    fn check_garbage_chain(&mut self, volume: &Volume, left: u64, right: u64) -> Result<()> {
        let mut page = left;
        while page != 0 {
            if page > MAX_VALID_PAGE_ADDR {
                self.add_fault(format!("Invalid page address {} on garbage chain", page), page, 0, 0);
                return Ok(());
            }
            if self.used_pages.contains(page) {
                self.add_fault("Page on garbage chain is referenced by multiple parents", page, 0, 0);
                return Ok(());
            }
            self.used_pages.insert(page);
            let buffer = match self.get_page(volume, page) {
                Ok(buffer) => buffer,
                Err(e) => {
                    self.add_fault(format!("Unable to read page: {}", e), page, 0, 0);
                    return Ok(());
                }
            };
            let page_type = buffer.header()?.page_type();
            if !matches!(page_type, PageType::Data | PageType::Index(_) | PageType::LongRecord) {
                self.add_fault(
                    format!("Page of type {} found on garbage chain", page_type),
                    page,
                    0,
                    0,
                );
            }
            self.counters.garbage_page_count += 1;
            self.pages_visited += 1;
            if page == right {
                break;
            }
            page = buffer.header()?.right_sibling();
        }
        Ok(())
    }
}
