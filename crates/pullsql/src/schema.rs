//! The schema model (C2): the graph→SQL mapping, primary keys, and join
//! descriptors every other component consults.
//!
//! A [`Schema`] is an immutable bag of maps (§9 "Schema configuration as a
//! value"); it validates itself at construction so that malformed
//! configuration fails immediately and loudly rather than surfacing as a
//! confusing SQL error three components downstream.

use crate::dialect::{self, Driver};
use crate::error::{EngineError, EngineResult};
use crate::query_shape::PropName;
use std::collections::{HashMap, HashSet};

/// Whether a join resolves to at most one row or a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Arity {
    ToOne,
    #[default]
    ToMany,
}

/// A join descriptor: a chain of 2 (direct) or 4 (many-to-many, through a
/// link table) SQL properties, plus its arity.
///
/// For a 2-element path `[a, b]`: `a` is the source-side column, `b` the
/// target-side column. For a 4-element path `[a, b, c, d]`: `a`–`b` link the
/// source table to the link table's left column, `c`–`d` link the link
/// table's right column to the target table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinDescriptor {
    pub path: Vec<PropName>,
    pub arity: Arity,
}

impl JoinDescriptor {
    pub fn direct(a: PropName, b: PropName, arity: Arity) -> Self {
        JoinDescriptor {
            path: vec![a, b],
            arity,
        }
    }

    pub fn many_to_many(a: PropName, b: PropName, c: PropName, d: PropName) -> Self {
        JoinDescriptor {
            path: vec![a, b, c, d],
            arity: Arity::ToMany,
        }
    }

    pub fn is_many_to_many(&self) -> bool {
        self.path.len() == 4
    }

    fn validate(&self, join_prop: &PropName) -> EngineResult<()> {
        if self.path.len() != 2 && self.path.len() != 4 {
            return Err(EngineError::SchemaInvalid(format!(
                "join descriptor for {join_prop} must have length 2 or 4, got {}",
                self.path.len()
            )));
        }
        Ok(())
    }
}

/// The graph-to-SQL mapping, primary keys, join descriptors, and dialect for
/// one logical entity graph.
#[derive(Debug, Clone)]
pub struct Schema {
    graph_to_sql: HashMap<PropName, PropName>,
    sql_to_graph: HashMap<PropName, PropName>,
    pks: HashMap<String, String>,
    joins: HashMap<PropName, JoinDescriptor>,
    driver: Driver,
    stable_child_order: bool,
    max_recursion_depth: usize,
}

const DEFAULT_MAX_RECURSION_DEPTH: usize = 64;

impl Schema {
    /// Construct and validate a schema.
    ///
    /// `graph_to_sql`, `pks`, and `joins` must all be present (possibly
    /// empty) per §4.2; each join descriptor's path length is checked here.
    pub fn new(
        graph_to_sql: HashMap<PropName, PropName>,
        pks: HashMap<String, String>,
        joins: HashMap<PropName, JoinDescriptor>,
        driver: Driver,
    ) -> EngineResult<Self> {
        for (join_prop, descriptor) in &joins {
            descriptor.validate(join_prop)?;
        }

        let sql_to_graph = graph_to_sql
            .iter()
            .map(|(g, s)| (s.clone(), g.clone()))
            .collect();

        Ok(Schema {
            graph_to_sql,
            sql_to_graph,
            pks,
            joins,
            driver,
            stable_child_order: false,
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
        })
    }

    /// Opt-in stable ordering of to-many join children by PK after grouping.
    /// Off by default — §8's scenarios rely on natural driver order with no
    /// `ORDER BY` emitted. Turn this on when cross-driver determinism matters
    /// more than matching the distilled spec's no-sort behavior exactly.
    pub fn with_stable_child_order(mut self, enabled: bool) -> Self {
        self.stable_child_order = enabled;
        self
    }

    /// Hard ceiling on sentinel-recursion depth, independent of cycle
    /// detection. Guards against a recursive join whose rows never repeat
    /// (e.g. a strictly increasing synthetic chain) recursing forever.
    pub fn with_max_recursion_depth(mut self, depth: usize) -> Self {
        self.max_recursion_depth = depth;
        self
    }

    pub fn driver(&self) -> Driver {
        self.driver
    }

    pub fn stable_child_order(&self) -> bool {
        self.stable_child_order
    }

    pub fn max_recursion_depth(&self) -> usize {
        self.max_recursion_depth
    }

    /// Apply the `graph→sql` remap if present, else identity, then normalize
    /// dashes to underscores in both parts (C1, `sqlize`).
    pub fn graph_to_sql(&self, p: &PropName) -> PropName {
        if p.is_id_sentinel() {
            return p.clone();
        }
        let remapped = self.graph_to_sql.get(p).cloned().unwrap_or_else(|| p.clone());
        self.sqlize(&remapped)
    }

    /// Inverse of [`Schema::graph_to_sql`] on the remapped subset; falls back
    /// to identity for properties with no explicit remap (round-trip
    /// property, §8).
    pub fn sql_to_graph(&self, p: &PropName) -> PropName {
        if p.is_id_sentinel() {
            return p.clone();
        }
        self.sql_to_graph.get(p).cloned().unwrap_or_else(|| p.clone())
    }

    fn sqlize(&self, p: &PropName) -> PropName {
        PropName {
            space: p.space.as_deref().map(|s| dialect::sqlize(self.driver, s)),
            leaf: dialect::sqlize(self.driver, &p.leaf),
        }
    }

    /// The primary-key column for `table`; defaults to `id`.
    pub fn pk(&self, table: &str) -> String {
        self.pks.get(table).cloned().unwrap_or_else(|| "id".to_string())
    }

    /// The SQL property `table/pk` naming this table's primary key.
    pub fn id_prop(&self, table: &str) -> PropName {
        PropName::new(table, self.pk(table))
    }

    /// The join descriptor for a SQL-form join property, if any.
    pub fn join(&self, sql_prop: &PropName) -> Option<&JoinDescriptor> {
        self.joins.get(sql_prop)
    }

    /// One `table/pk` SQL property per table named in `pks`.
    pub fn id_columns(&self) -> HashSet<PropName> {
        self.pks
            .iter()
            .map(|(table, pk)| PropName::new(table.clone(), pk.clone()))
            .collect()
    }
}
