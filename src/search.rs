//! `indexkit search`: build a query from command-line arguments and print
//! the results.
//!
//! Filters are written `FIELD<OP>VALUE` (`views>=2`, `tags=rust`,
//! `_language<>de`) or with a word operator separated by spaces
//! (`"views BETWEEN 1,5"`, `"tags NOT IN a,b"`). List values are comma
//! separated; `null` matches empty fields.

use anyhow::{anyhow, bail, Result};
use indexkit_core::condition::{Conjunction, Operator};
use indexkit_core::context::SearchContext;
use indexkit_core::field::Value;
use indexkit_core::processor::access::Account;
use indexkit_core::query::{ParseMode, Query, QueryOptions};
use indexkit_core::results::ResultSet;

use crate::config::Config;
use crate::workspace::Workspace;

#[derive(Debug, Clone, Default)]
pub struct SearchArgs {
    pub index: String,
    pub keys: Option<String>,
    pub parse_mode: Option<String>,
    pub conjunction: Option<String>,
    pub fields: Vec<String>,
    pub filters: Vec<String>,
    pub sorts: Vec<String>,
    pub offset: Option<usize>,
    pub limit: usize,
    pub languages: Vec<String>,
    pub account: Option<String>,
    pub grants: Vec<String>,
    pub bypass_access: bool,
    pub json: bool,
}

pub async fn run_search(config: &Config, args: &SearchArgs) -> Result<()> {
    let workspace = Workspace::open(config).await?;
    let index = workspace.index(&args.index)?;

    let query = build_query(index.query(query_options(args)?), args)?;
    let mut context = SearchContext::new();
    let results = context.execute(query).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(results)?);
    } else {
        print_results(results, args.offset.unwrap_or(0));
    }

    workspace.close().await;
    Ok(())
}

fn query_options(args: &SearchArgs) -> Result<QueryOptions> {
    let parse_mode = match &args.parse_mode {
        Some(raw) => raw.parse::<ParseMode>()?,
        None => ParseMode::default(),
    };
    let access_account = args.account.as_ref().map(|id| {
        let mut account = Account::new(id.clone());
        account.grants = args.grants.clone();
        account
    });
    Ok(QueryOptions {
        parse_mode,
        conjunction: args
            .conjunction
            .as_deref()
            .map(Conjunction::normalize)
            .unwrap_or_default(),
        languages: args.languages.clone(),
        bypass_access: args.bypass_access,
        access_account,
        ..QueryOptions::default()
    })
}

/// Apply keys, fields, filters, sorts and range to `query`.
pub fn build_query(mut query: Query, args: &SearchArgs) -> Result<Query> {
    query.keys(args.keys.as_deref().filter(|k| !k.trim().is_empty()));
    if !args.fields.is_empty() {
        query.fields(args.fields.clone())?;
    }

    for raw in &args.filters {
        let (field, operator, raw_value) = parse_filter(raw)?;
        let field_type = query
            .field_type(&field)
            .ok_or_else(|| anyhow!("Unknown filter field '{}'", field))?;
        let scalar = field_type.inner().clone();
        let value = if operator.takes_list() {
            Value::List(
                raw_value
                    .split(',')
                    .map(|v| Value::parse_as(v.trim(), &scalar))
                    .collect(),
            )
        } else if raw_value.eq_ignore_ascii_case("null") {
            Value::Null
        } else {
            Value::parse_as(&raw_value, &scalar)
        };
        query.condition(field, value, operator);
    }

    for raw in &args.sorts {
        let (field, order) = raw.split_once(':').unwrap_or((raw.as_str(), "ASC"));
        query.sort(field, order)?;
    }

    query.range(args.offset, Some(args.limit));
    Ok(query)
}

/// Split a filter expression into field, operator and raw value.
pub fn parse_filter(raw: &str) -> Result<(String, Operator, String)> {
    const WORD_OPERATORS: [&str; 4] = [" NOT BETWEEN ", " BETWEEN ", " NOT IN ", " IN "];

    let upper = raw.to_ascii_uppercase();
    let (field, operator, value) = match WORD_OPERATORS
        .iter()
        .find_map(|word| upper.find(word).map(|pos| (pos, *word)))
    {
        Some((pos, word)) => (
            &raw[..pos],
            word.trim().parse::<Operator>()?,
            &raw[pos + word.len()..],
        ),
        None => {
            let pos = raw
                .find(['=', '<', '>', '!'])
                .ok_or_else(|| anyhow!("Filter '{}' has no operator", raw))?;
            let rest = &raw[pos..];
            let len = if ["<>", "<=", ">=", "!=", "=="]
                .iter()
                .any(|op| rest.starts_with(op))
            {
                2
            } else {
                1
            };
            (&raw[..pos], rest[..len].parse::<Operator>()?, &rest[len..])
        }
    };

    let field = field.trim();
    if field.is_empty() {
        bail!("Filter '{}' has no field", raw);
    }
    Ok((field.to_string(), operator, value.trim().to_string()))
}

fn print_results(results: &ResultSet, offset: usize) {
    for warning in &results.warnings {
        eprintln!("warning: {}", warning);
    }
    if !results.ignored.is_empty() {
        eprintln!("ignored keys: {}", results.ignored.join(", "));
    }

    if results.results.is_empty() {
        println!("No results.");
        return;
    }

    println!(
        "{} result{} ({:.3}s)",
        results.result_count,
        if results.result_count == 1 { "" } else { "s" },
        results.performance.complete
    );
    println!();
    for (i, item) in results.results.iter().enumerate() {
        println!(
            "{}. {}  (score {:.2})",
            offset + i + 1,
            item.id,
            item.score.unwrap_or(0.0)
        );
        if let Some(excerpt) = &item.excerpt {
            println!("    {}", excerpt);
        }
        for (name, field) in &item.fields {
            if name.starts_with('_') || field.value.is_empty() {
                continue;
            }
            let text = field.value.to_text();
            let shown: String = text.chars().take(80).collect();
            let more = if text.chars().count() > 80 { "..." } else { "" };
            println!("    {}: {}{}", name, shown, more);
        }
        println!();
    }
}
