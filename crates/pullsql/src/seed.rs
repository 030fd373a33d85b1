//! Seed helper (C8): applies a batch of insert/update instructions, resolving
//! symbolic placeholders used to cross-reference rows that don't have a real
//! id yet (e.g. seeding a parent and child in the same batch).
//!
//! A placeholder is any [`SqlValue::Text`] starting with `:` (§4.8). Two
//! passes: first allocate a real id (via [`dialect::next_id`]) for every
//! placeholder used as a [`SeedInstruction::Row`]'s own primary-key slot,
//! then substitute placeholders everywhere — including other rows' foreign
//! keys and `Update`'s target id — before executing.

use crate::client::GenericClient;
use crate::dialect;
use crate::error::{EngineError, EngineResult};
use crate::schema::Schema;
use crate::sql::Sql;
use crate::value::SqlValue;
use std::collections::{BTreeMap, HashMap};

/// One seed instruction: insert a new row, or update an existing one.
#[derive(Debug, Clone)]
pub enum SeedInstruction {
    Row {
        table: String,
        values: BTreeMap<String, SqlValue>,
    },
    Update {
        table: String,
        id: SqlValue,
        values: BTreeMap<String, SqlValue>,
    },
}

enum Resolved {
    Row { table: String, values: BTreeMap<String, SqlValue> },
    Update { table: String, id: i64, values: BTreeMap<String, SqlValue> },
}

/// Apply a batch of seed instructions, returning the placeholder → allocated
/// id mapping (§4.8).
///
/// `dev` is forwarded to [`dialect::next_id`]'s jitter so that fixtures
/// seeded across different tables don't end up sharing small ids.
#[tracing::instrument(skip(conn, schema, instructions), fields(instructions = instructions.len()))]
pub async fn seed<C: GenericClient + Sync>(
    conn: &C,
    schema: &Schema,
    instructions: &[SeedInstruction],
    dev: bool,
) -> EngineResult<HashMap<String, i64>> {
    tracing::debug!(count = instructions.len(), dev, "seeding fixtures");
    let mut placeholders: HashMap<String, i64> = HashMap::new();

    for instruction in instructions {
        if let SeedInstruction::Row { table, values } = instruction {
            let pk = schema.pk(table);
            let Some(placeholder) = values.get(&pk).and_then(SqlValue::as_placeholder) else {
                continue;
            };
            if placeholders.contains_key(placeholder) {
                return Err(EngineError::SeedPlaceholderReuse(placeholder.to_string()));
            }
            let id = dialect::next_id(conn, schema.driver(), table, &pk, dev).await?;
            placeholders.insert(placeholder.to_string(), id);
        }
    }

    let resolved = instructions
        .iter()
        .map(|i| resolve_instruction(i, &placeholders))
        .collect::<EngineResult<Vec<_>>>()?;

    for instruction in &resolved {
        if let Resolved::Row { table, values } = instruction {
            execute_insert(conn, table, values).await?;
        }
    }
    for instruction in &resolved {
        if let Resolved::Update { table, id, values } = instruction {
            execute_update(conn, table, &schema.pk(table), *id, values).await?;
        }
    }

    Ok(placeholders)
}

fn resolve_instruction(
    instruction: &SeedInstruction,
    placeholders: &HashMap<String, i64>,
) -> EngineResult<Resolved> {
    match instruction {
        SeedInstruction::Row { table, values } => Ok(Resolved::Row {
            table: table.clone(),
            values: resolve_values(values, placeholders)?,
        }),
        SeedInstruction::Update { table, id, values } => Ok(Resolved::Update {
            table: table.clone(),
            id: resolve_value(id, placeholders)?.as_id()?,
            values: resolve_values(values, placeholders)?,
        }),
    }
}

fn resolve_values(
    values: &BTreeMap<String, SqlValue>,
    placeholders: &HashMap<String, i64>,
) -> EngineResult<BTreeMap<String, SqlValue>> {
    values
        .iter()
        .map(|(k, v)| Ok((k.clone(), resolve_value(v, placeholders)?)))
        .collect()
}

/// Substitute a recognized placeholder with its allocated id. An unrecognized
/// placeholder (no matching `Row`'s PK slot in this batch) passes through
/// unchanged (§4.8) — it isn't necessarily a placeholder at all, just a
/// literal value that happens to start with `:`.
fn resolve_value(value: &SqlValue, placeholders: &HashMap<String, i64>) -> EngineResult<SqlValue> {
    match value.as_placeholder() {
        Some(p) => match placeholders.get(p) {
            Some(id) => Ok(SqlValue::BigInt(*id)),
            None => Ok(value.clone()),
        },
        None => Ok(value.clone()),
    }
}

async fn execute_insert<C: GenericClient + Sync>(
    conn: &C,
    table: &str,
    values: &BTreeMap<String, SqlValue>,
) -> EngineResult<()> {
    if values.is_empty() {
        Sql::new(format!("INSERT INTO {table} DEFAULT VALUES"))
            .execute(conn)
            .await?;
        return Ok(());
    }

    let cols: Vec<&str> = values.keys().map(String::as_str).collect();
    let mut sql = Sql::new(format!("INSERT INTO {table} ({}) VALUES (", cols.join(", ")));
    for (i, value) in values.values().enumerate() {
        if i > 0 {
            sql.push(", ");
        }
        sql.push_bind(value.clone());
    }
    sql.push(")");
    sql.execute(conn).await?;
    Ok(())
}

async fn execute_update<C: GenericClient + Sync>(
    conn: &C,
    table: &str,
    pk: &str,
    id: i64,
    values: &BTreeMap<String, SqlValue>,
) -> EngineResult<()> {
    let mut sql = Sql::new(format!("UPDATE {table} SET "));
    for (i, (col, value)) in values.iter().enumerate() {
        if i > 0 {
            sql.push(", ");
        }
        sql.push(&format!("{col} = "));
        sql.push_bind(value.clone());
    }
    sql.push(&format!(" WHERE {pk} = "));
    sql.push_bind(id);
    sql.execute(conn).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_value_substitutes_known_placeholder() {
        let mut placeholders = HashMap::new();
        placeholders.insert(":acme".to_string(), 42_i64);
        let resolved = resolve_value(&SqlValue::Text(":acme".into()), &placeholders).unwrap();
        assert_eq!(resolved, SqlValue::BigInt(42));
    }

    #[test]
    fn resolve_value_passes_through_non_placeholder() {
        let placeholders = HashMap::new();
        let resolved = resolve_value(&SqlValue::Int(7), &placeholders).unwrap();
        assert_eq!(resolved, SqlValue::Int(7));
    }

    #[test]
    fn resolve_value_passes_through_unknown_placeholder() {
        let placeholders = HashMap::new();
        let resolved = resolve_value(&SqlValue::Text(":ghost".into()), &placeholders).unwrap();
        assert_eq!(resolved, SqlValue::Text(":ghost".into()));
    }

    #[test]
    fn resolve_instruction_resolves_update_id() {
        let mut placeholders = HashMap::new();
        placeholders.insert(":acme".to_string(), 5_i64);
        let instruction = SeedInstruction::Update {
            table: "account".to_string(),
            id: SqlValue::Text(":acme".into()),
            values: BTreeMap::new(),
        };
        match resolve_instruction(&instruction, &placeholders).unwrap() {
            Resolved::Update { id, .. } => assert_eq!(id, 5),
            _ => panic!("expected Update"),
        }
    }
}
