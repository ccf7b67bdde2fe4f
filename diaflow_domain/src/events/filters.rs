// /////////////////////////////////////////////////////////////////////////////
// Diaflow Execution Core
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Event Filters
//!
//! Predicate objects applied at subscription time. A subscription may carry
//! a filter; the bus evaluates it after the event-type index match, before
//! enqueueing to the subscription's queue.
//!
//! Standard filters cover the common cases: execution scope (with optional
//! sub-execution inclusion via prefix match), node scope, event-type sets,
//! logical composition, and the sub-diagram propagation rules.

use crate::events::contracts::DomainEvent;
use crate::events::types::EventType;
use crate::value_objects::{ExecutionId, NodeId};
use std::collections::HashSet;
use std::sync::Arc;

/// Predicate over domain events.
pub trait EventFilter: Send + Sync {
    /// Checks if an event matches the filter criteria.
    fn matches(&self, event: &DomainEvent) -> bool;
}

/// Filter events by execution scope, for sub-diagram isolation.
///
/// With `include_children` (the default), sub-executions match via the
/// lexical-prefix convention on execution ids.
#[derive(Debug, Clone)]
pub struct ExecutionScopeFilter {
    pub execution_id: ExecutionId,
    pub include_children: bool,
}

impl ExecutionScopeFilter {
    pub fn new(execution_id: ExecutionId) -> Self {
        Self {
            execution_id,
            include_children: true,
        }
    }

    pub fn exact(execution_id: ExecutionId) -> Self {
        Self {
            execution_id,
            include_children: false,
        }
    }
}

impl EventFilter for ExecutionScopeFilter {
    fn matches(&self, event: &DomainEvent) -> bool {
        if self.include_children {
            event.scope.execution_id.is_same_or_child_of(&self.execution_id)
        } else {
            event.scope.execution_id == self.execution_id
        }
    }
}

/// Filter events by node scope.
///
/// Events without a node id (execution-level events) always pass, so a
/// node-scoped subscriber still observes the surrounding lifecycle.
#[derive(Debug, Clone)]
pub struct NodeScopeFilter {
    pub node_ids: HashSet<NodeId>,
}

impl NodeScopeFilter {
    pub fn new(node_ids: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            node_ids: node_ids.into_iter().collect(),
        }
    }
}

impl EventFilter for NodeScopeFilter {
    fn matches(&self, event: &DomainEvent) -> bool {
        match &event.scope.node_id {
            None => true,
            Some(node_id) => self.node_ids.contains(node_id),
        }
    }
}

/// Filter events by type membership.
#[derive(Debug, Clone)]
pub struct EventTypeFilter {
    pub allowed_types: HashSet<EventType>,
}

impl EventTypeFilter {
    pub fn new(allowed_types: impl IntoIterator<Item = EventType>) -> Self {
        Self {
            allowed_types: allowed_types.into_iter().collect(),
        }
    }
}

impl EventFilter for EventTypeFilter {
    fn matches(&self, event: &DomainEvent) -> bool {
        self.allowed_types.contains(&event.event_type())
    }
}

/// Combine multiple filters with AND (default) or OR logic.
///
/// An empty filter list matches everything.
#[derive(Clone)]
pub struct CompositeFilter {
    pub filters: Vec<Arc<dyn EventFilter>>,
    pub require_all: bool,
}

impl CompositeFilter {
    /// Logical AND of the given filters.
    pub fn all(filters: Vec<Arc<dyn EventFilter>>) -> Self {
        Self {
            filters,
            require_all: true,
        }
    }

    /// Logical OR of the given filters.
    pub fn any(filters: Vec<Arc<dyn EventFilter>>) -> Self {
        Self {
            filters,
            require_all: false,
        }
    }
}

impl EventFilter for CompositeFilter {
    fn matches(&self, event: &DomainEvent) -> bool {
        if self.filters.is_empty() {
            return true;
        }
        if self.require_all {
            self.filters.iter().all(|f| f.matches(event))
        } else {
            self.filters.iter().any(|f| f.matches(event))
        }
    }
}

/// Filter for sub-diagram execution events.
///
/// `scope_to_execution` restricts to the parent's sub-tree (prefix match);
/// otherwise `propagate_to_sub = false` restricts to the parent execution
/// exactly. An optional type set narrows further.
#[derive(Debug, Clone)]
pub struct SubDiagramFilter {
    pub parent_execution_id: ExecutionId,
    pub propagate_to_sub: bool,
    pub scope_to_execution: bool,
    pub allowed_event_types: Option<HashSet<EventType>>,
}

impl SubDiagramFilter {
    pub fn new(parent_execution_id: ExecutionId) -> Self {
        Self {
            parent_execution_id,
            propagate_to_sub: true,
            scope_to_execution: false,
            allowed_event_types: None,
        }
    }
}

impl EventFilter for SubDiagramFilter {
    fn matches(&self, event: &DomainEvent) -> bool {
        let event_exec = &event.scope.execution_id;

        if self.scope_to_execution {
            if !event_exec.is_same_or_child_of(&self.parent_execution_id) {
                return false;
            }
        } else if !self.propagate_to_sub && *event_exec != self.parent_execution_id {
            return false;
        }

        match &self.allowed_event_types {
            None => true,
            Some(types) => types.contains(&event.event_type()),
        }
    }
}
