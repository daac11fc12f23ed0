//! Fault records: one structural inconsistency, located by the page path the
//! walker took to reach it.

use smallvec::SmallVec;

use crate::config::MAX_TREE_DEPTH;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    /// "volume" or "volume:tree" the fault belongs to.
    pub resource_name: String,
    pub description: String,
    /// Page addresses from the root (first) down to the faulted page (last).
    pub path: SmallVec<[u64; MAX_TREE_DEPTH]>,
    /// Tree level of the faulted page.
    pub level: usize,
    /// Depth of the tree at the time of the fault.
    pub depth: usize,
    /// Keyblock slot within the page, when the fault is record-scoped.
    pub position: usize,
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "  Tree {} {} (path ", self.resource_name, self.description)?;
        for (index, page) in self.path.iter().enumerate() {
            if index > 0 {
                write!(f, "->")?;
            }
            write!(f, "{}", page)?;
        }
        if self.position != 0 {
            write!(f, ":{}", self.position)?;
        }
        write!(f, ") level={} depth={}", self.level, self.depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_path_and_location() {
        let fault = Fault {
            resource_name: "vol:tree".to_string(),
            description: "keys are not strictly increasing".to_string(),
            path: SmallVec::from_slice(&[12, 30, 45]),
            level: 0,
            depth: 3,
            position: 4,
        };
        let text = fault.to_string();
        assert!(text.contains("vol:tree"));
        assert!(text.contains("12->30->45:4"));
        assert!(text.contains("level=0 depth=3"));
    }
}
