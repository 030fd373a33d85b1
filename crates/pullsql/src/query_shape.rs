//! Query shapes: the caller-facing, tree-structured selection the engine
//! translates into SQL.
//!
//! A [`Query`] is an ordered sequence of leaves and joins. A join's
//! sub-selection is either an explicit nested [`Query`] or a [`Recursion`]
//! marker, meaning "recurse using this same enclosing query shape" (the
//! classic EQL/Om-Next recursive-union idiom this engine's test scenarios are
//! written against).

use std::fmt;

/// A two-part caller property name: `space/leaf` (e.g. `account/name`).
///
/// `id` and `db/id` are sentinels meaning "the primary key of the inferred
/// table" and carry no `space`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropName {
    pub space: Option<String>,
    pub leaf: String,
}

impl PropName {
    pub fn new(space: impl Into<String>, leaf: impl Into<String>) -> Self {
        PropName {
            space: Some(space.into()),
            leaf: leaf.into(),
        }
    }

    /// The `db/id`/`id` sentinel.
    pub fn id_sentinel() -> Self {
        PropName {
            space: None,
            leaf: "id".to_string(),
        }
    }

    pub fn is_id_sentinel(&self) -> bool {
        self.space.is_none() && self.leaf == "id"
    }

    /// Parse `space/leaf`, or the bare sentinels `id`/`db/id`.
    pub fn parse(s: &str) -> Self {
        if s == "id" || s == "db/id" {
            return Self::id_sentinel();
        }
        match s.split_once('/') {
            Some((space, leaf)) => PropName::new(space, leaf),
            None => PropName {
                space: None,
                leaf: s.to_string(),
            },
        }
    }
}

impl fmt::Display for PropName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.space {
            Some(space) => write!(f, "{space}/{}", self.leaf),
            None => write!(f, "db/{}", self.leaf),
        }
    }
}

/// A join's recursion marker: either the sentinel (`...`, unbounded modulo
/// cycle detection and the hard ceiling) or a small positive integer counting
/// down the remaining levels to expand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recursion {
    Sentinel,
    Depth(i64),
}

impl Recursion {
    /// Apply the per-level decrement rule (§4.6 step 4). Returns `None` when
    /// the branch should not recurse further.
    pub fn step(self) -> Option<Recursion> {
        match self {
            Recursion::Sentinel => Some(Recursion::Sentinel),
            Recursion::Depth(n) if n > 0 => Some(Recursion::Depth(n - 1)),
            Recursion::Depth(_) => None,
        }
    }
}

/// A join element's sub-selection.
#[derive(Debug, Clone, PartialEq)]
pub enum SubQuery {
    /// An explicit nested query shape.
    Query(Query),
    /// Recurse using the query that contains this very join element.
    Recursive(Recursion),
}

/// One element of a [`Query`]: a plain property, or a join with its
/// sub-selection.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryElement {
    Leaf(PropName),
    Join { prop: PropName, sub: SubQuery },
}

/// An ordered query shape: the unit the analyzer, emitter, and traversal
/// driver all operate on.
pub type Query = Vec<QueryElement>;

/// Build a [`Query`] element that selects a caller property by name.
pub fn leaf(prop: &str) -> QueryElement {
    QueryElement::Leaf(PropName::parse(prop))
}

/// Build a [`Query`] element for a join with an explicit nested sub-query.
pub fn join(prop: &str, sub: Query) -> QueryElement {
    QueryElement::Join {
        prop: PropName::parse(prop),
        sub: SubQuery::Query(sub),
    }
}

/// Build a [`Query`] element for a self-recursive join.
pub fn join_recursive(prop: &str, recursion: Recursion) -> QueryElement {
    QueryElement::Join {
        prop: PropName::parse(prop),
        sub: SubQuery::Recursive(recursion),
    }
}

/// Re-point a join element's recursion marker at the next step, leaving
/// every other element of `query` untouched. Used by the traversal driver to
/// build the query shape for the next recursive level: the recursive join's
/// own enclosing query is reused with the decremented marker.
pub fn with_recursion_step(query: &Query, join_prop: &PropName, next: Recursion) -> Query {
    query
        .iter()
        .map(|el| match el {
            QueryElement::Join { prop, sub: _ } if prop == join_prop => QueryElement::Join {
                prop: prop.clone(),
                sub: SubQuery::Recursive(next),
            },
            other => other.clone(),
        })
        .collect()
}
