//! Record commands - save, get, delete, query, tables

use super::{open_database, parse_assignment};
use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::Value;
use stash_core::allocator::PK_MAP_KEY;
use stash_core::{Record, RecordId};
use tracing::info;

/// Save a record built from key=value assignments
pub async fn save(namespace: Option<&str>, table: &str, fields: &[String]) -> Result<()> {
    let record = build_record(fields)?;

    let db = open_database(namespace).await?;
    let table = db.table(table)?;
    let saved = table
        .save(record)
        .await
        .with_context(|| format!("Failed to save into {}", table.name()))?;

    let id = saved.id(table.primary_key()).unwrap_or_default();
    info!("Saved {} {}", table.name(), id);
    println!("{} Saved {} #{}", "✓".green(), table.name().cyan(), id);
    print_record(&saved)?;
    Ok(())
}

/// Print one record
pub async fn get(namespace: Option<&str>, table: &str, id: RecordId) -> Result<()> {
    let db = open_database(namespace).await?;
    let table = db.table(table)?;

    match table.get_by_id(id).await? {
        Some(record) => print_record(&record)?,
        None => println!("{} {} #{} not found", "✗".red(), table.name(), id),
    }
    Ok(())
}

/// Delete one record
pub async fn delete(namespace: Option<&str>, table: &str, id: RecordId) -> Result<()> {
    let db = open_database(namespace).await?;
    let table = db.table(table)?;

    match table.delete(id).await? {
        Some(_) => println!("{} Deleted {} #{}", "✓".green(), table.name().cyan(), id),
        None => println!("{} {} #{} not found", "✗".red(), table.name(), id),
    }
    Ok(())
}

/// Print every record matching all `key=value` filters
pub async fn query(namespace: Option<&str>, table: &str, filters: &[String]) -> Result<()> {
    let filters = filters
        .iter()
        .map(|f| parse_assignment(f))
        .collect::<Result<Vec<_>>>()?;

    let db = open_database(namespace).await?;
    let table = db.table(table)?;
    let records = table.query(|record| matches_all(record, &filters)).await?;

    if records.is_empty() {
        println!("{}", "No records".dimmed());
        return Ok(());
    }
    for record in &records {
        print_record(record)?;
    }
    println!("{}", format!("{} record(s)", records.len()).dimmed());
    Ok(())
}

/// List tables known to the identifier allocator
pub async fn tables(namespace: Option<&str>) -> Result<()> {
    let db = open_database(namespace).await?;

    let counters = match db.store().get(PK_MAP_KEY).await? {
        Some(Value::Object(counters)) => counters,
        _ => {
            println!("{}", "No tables".dimmed());
            return Ok(());
        }
    };

    println!("{}", format!("Tables in {}", db.namespace()).bold().underline());
    for (name, last) in counters {
        println!("  {:<24} last id {}", name.cyan(), last);
    }
    Ok(())
}

fn build_record(fields: &[String]) -> Result<Record> {
    let mut record = Record::new();
    for field in fields {
        let (key, value) = parse_assignment(field)?;
        record.set(key, value);
    }
    Ok(record)
}

fn matches_all(record: &Record, filters: &[(String, Value)]) -> bool {
    filters
        .iter()
        .all(|(key, expected)| record.get(key) == Some(expected))
}

fn print_record(record: &Record) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(record)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_record() {
        let record = build_record(&["name=a".to_string(), "age=3".to_string()]).unwrap();
        assert_eq!(record.get("name"), Some(&json!("a")));
        assert_eq!(record.get("age"), Some(&json!(3)));
        assert_eq!(record.id("id"), None);
    }

    #[test]
    fn test_matches_all() {
        let record = Record::new().with("name", "a").with("age", 3);

        assert!(matches_all(&record, &[]));
        assert!(matches_all(&record, &[("age".to_string(), json!(3))]));
        assert!(!matches_all(
            &record,
            &[("age".to_string(), json!(3)), ("name".to_string(), json!("b"))]
        ));
    }
}
