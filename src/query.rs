//! Pad-to-pad queries, answered in place.
//!
//! A query is created by the asking element, sent to a peer pad, mutated
//! with the answer, and read back by the asker. The two query types drive
//! the two negotiation phases: CAPS discovers what a peer can accept,
//! ALLOCATION agrees on buffer provisioning once caps are fixed.

use crate::caps::Caps;
use crate::event::Direction;
use crate::pool::PoolConfig;
use std::sync::Arc;

/// A question sent to a peer pad, answered by mutation.
#[derive(Debug)]
pub enum Query {
    /// What caps can the receiver accept, narrowed by a filter?
    Caps {
        /// The asker's constraint; the answer must intersect it.
        filter: Arc<Caps>,
        /// The receiver's answer.
        result: Option<Arc<Caps>>,
    },

    /// How should buffers be provisioned for the given fixed caps?
    Allocation {
        /// The fixed caps the allocation is for.
        caps: Arc<Caps>,
        /// Pool parameters proposed by the receiver, if any.
        pool: Option<PoolConfig>,
        /// Whether the receiver accepts the allocation.
        accepted: bool,
    },
}

impl Query {
    /// Create a caps query with the given filter.
    pub fn caps(filter: Arc<Caps>) -> Self {
        Query::Caps {
            filter,
            result: None,
        }
    }

    /// Create an allocation query for the given fixed caps.
    pub fn allocation(caps: Arc<Caps>) -> Self {
        Query::Allocation {
            caps,
            pool: None,
            accepted: false,
        }
    }

    /// Get the flow direction of this query type.
    pub fn direction(&self) -> Direction {
        match self {
            Query::Caps { .. } => Direction::Both,
            Query::Allocation { .. } => Direction::Downstream,
        }
    }

    /// Get a human-readable name for this query type.
    pub fn name(&self) -> &'static str {
        match self {
            Query::Caps { .. } => "caps",
            Query::Allocation { .. } => "allocation",
        }
    }

    /// Get the caps filter of a caps query.
    pub fn filter(&self) -> Option<&Arc<Caps>> {
        match self {
            Query::Caps { filter, .. } => Some(filter),
            _ => None,
        }
    }

    /// Get the answer of a caps query.
    pub fn caps_result(&self) -> Option<&Arc<Caps>> {
        match self {
            Query::Caps { result, .. } => result.as_ref(),
            _ => None,
        }
    }

    /// Answer a caps query.
    pub fn set_caps_result(&mut self, caps: Arc<Caps>) {
        if let Query::Caps { result, .. } = self {
            *result = Some(caps);
        }
    }

    /// Get the fixed caps of an allocation query.
    pub fn allocation_caps(&self) -> Option<&Arc<Caps>> {
        match self {
            Query::Allocation { caps, .. } => Some(caps),
            _ => None,
        }
    }

    /// Check whether an allocation query was accepted.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Query::Allocation { accepted: true, .. })
    }

    /// Accept an allocation query, optionally proposing pool parameters.
    pub fn accept_allocation(&mut self, proposal: Option<PoolConfig>) {
        if let Query::Allocation { pool, accepted, .. } = self {
            *pool = proposal;
            *accepted = true;
        }
    }

    /// Get the pool parameters proposed on an allocation query.
    pub fn proposed_pool(&self) -> Option<PoolConfig> {
        match self {
            Query::Allocation { pool, .. } => *pool,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caps_query_roundtrip() {
        let filter = Arc::new(Caps::any());
        let mut query = Query::caps(Arc::clone(&filter));
        assert!(query.caps_result().is_none());
        assert_eq!(query.name(), "caps");
        assert_eq!(query.direction(), Direction::Both);

        let answer = Arc::new(Caps::empty());
        query.set_caps_result(Arc::clone(&answer));
        assert!(Arc::ptr_eq(query.caps_result().unwrap(), &answer));
        assert!(Arc::ptr_eq(query.filter().unwrap(), &filter));
    }

    #[test]
    fn test_allocation_query_accept() {
        let caps = Arc::new(Caps::any());
        let mut query = Query::allocation(caps);
        assert!(!query.is_accepted());

        query.accept_allocation(Some(PoolConfig::default()));
        assert!(query.is_accepted());
        assert_eq!(query.proposed_pool(), Some(PoolConfig::default()));
    }

    #[test]
    fn test_type_mismatched_accessors() {
        let query = Query::caps(Arc::new(Caps::any()));
        assert!(query.allocation_caps().is_none());
        assert!(!query.is_accepted());
    }
}
