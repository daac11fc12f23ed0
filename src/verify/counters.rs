//! Page and byte counters accumulated by an integrity check run.

/// Counter block. `snapshot` and `difference` support per-tree and per-volume
/// deltas: take a snapshot before the subtree, difference it afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub index_page_count: u64,
    pub data_page_count: u64,
    pub index_bytes_in_use: u64,
    pub data_bytes_in_use: u64,
    pub long_record_page_count: u64,
    pub long_record_bytes_in_use: u64,
    pub index_hole_count: u64,
    pub mvv_page_count: u64,
    pub mvv_count: u64,
    pub mvv_overhead: u64,
    pub mvv_anti_value_count: u64,
    pub pruning_error_count: u64,
    pub pruned_page_count: u64,
    pub garbage_page_count: u64,
}

pub const CSV_HEADERS: &str = "IndexPages,IndexBytes,DataPages,DataBytes,LongRecordPages,\
LongRecordBytes,MvvPages,MvvRecords,MvvOverhead,MvvAntiValues,IndexHoles,PrunedPages";

impl Counters {
    pub fn snapshot(&self) -> Counters {
        *self
    }

    /// Rewrite `self` as the delta from this snapshot to `current`.
    pub fn difference(&mut self, current: &Counters) {
        self.index_page_count = current.index_page_count - self.index_page_count;
        self.data_page_count = current.data_page_count - self.data_page_count;
        self.index_bytes_in_use = current.index_bytes_in_use - self.index_bytes_in_use;
        self.data_bytes_in_use = current.data_bytes_in_use - self.data_bytes_in_use;
        self.long_record_page_count = current.long_record_page_count - self.long_record_page_count;
        self.long_record_bytes_in_use = current.long_record_bytes_in_use - self.long_record_bytes_in_use;
        self.index_hole_count = current.index_hole_count - self.index_hole_count;
        self.mvv_page_count = current.mvv_page_count - self.mvv_page_count;
        self.mvv_count = current.mvv_count - self.mvv_count;
        self.mvv_overhead = current.mvv_overhead - self.mvv_overhead;
        self.mvv_anti_value_count = current.mvv_anti_value_count - self.mvv_anti_value_count;
        self.pruning_error_count = current.pruning_error_count - self.pruning_error_count;
        self.pruned_page_count = current.pruned_page_count - self.pruned_page_count;
        self.garbage_page_count = current.garbage_page_count - self.garbage_page_count;
    }

    pub fn to_csv(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{},{},{},{}",
            self.index_page_count,
            self.index_bytes_in_use,
            self.data_page_count,
            self.data_bytes_in_use,
            self.long_record_page_count,
            self.long_record_bytes_in_use,
            self.mvv_page_count,
            self.mvv_count,
            self.mvv_overhead,
            self.mvv_anti_value_count,
            self.index_hole_count,
            self.pruned_page_count,
        )
    }
}

impl std::fmt::Display for Counters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Index pages/bytes: {} / {} Data pages/bytes: {} / {} \
             LongRec pages/bytes: {} / {}  MVV pages/records/bytes/antivalues: \
             {} / {} / {} / {}  Holes {} Pages pruned {}",
            self.index_page_count,
            self.index_bytes_in_use,
            self.data_page_count,
            self.data_bytes_in_use,
            self.long_record_page_count,
            self.long_record_bytes_in_use,
            self.mvv_page_count,
            self.mvv_count,
            self.mvv_overhead,
            self.mvv_anti_value_count,
            self.index_hole_count,
            self.pruned_page_count,
        )
    }
}
