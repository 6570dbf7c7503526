use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ragroute::chat::{ChatEngine, ChatEvent, Conversation, Document, EventSink};
use ragroute::db::{migrate, Db};
use ragroute::graph::{RelationTriplet, SimpleGraphStore};
use ragroute::{Config, RagrouteError};
use std::path::Path;

#[derive(Parser, Debug)]
#[command(name = "ragroute")]
#[command(about = "Answer company questions from a knowledge graph and selected documents", version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run migrations and verify the index database schema
    Verify,
    /// Add a (subject, predicate, object) triplet to the graph store
    GraphAdd {
        subject: String,
        predicate: String,
        object: String,
    },
    /// Answer a question
    Ask {
        question: String,
        /// Selected document as `<id>=<url>`; repeat for several
        #[arg(long = "doc", value_parser = parse_document)]
        docs: Vec<Document>,
    },
}

fn parse_document(raw: &str) -> std::result::Result<Document, String> {
    let (id, url) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected <id>=<url>, got {:?}", raw))?;
    if id.trim().is_empty() || url.trim().is_empty() {
        return Err(format!("expected <id>=<url>, got {:?}", raw));
    }
    Ok(Document::new(id.trim(), url.trim()))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", "info")
    ).init();

    let args = Args::parse();

    match args.command.unwrap_or(Command::Verify) {
        Command::Verify => run_schema_verification().await?,
        Command::GraphAdd { subject, predicate, object } => add_triplet(subject, predicate, object)?,
        Command::Ask { question, docs } => ask(question, docs).await?,
    }

    Ok(())
}

async fn init_db(config: &Config) -> Result<Db> {
    let db = Db::new(config.db_path());
    db.migrate(Path::new("migrations")).await?;
    log::info!("Database initialized successfully");
    Ok(db)
}

/// Run database schema verification
async fn run_schema_verification() -> Result<()> {
    log::info!("Starting RAGRoute v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    log::info!("Configuration loaded successfully");
    log::info!("Database path: {}", config.db_path().display());
    log::info!("Graph store: {}", config.graph.graph_store_path.display());
    log::info!("Chat model: {}, embedding model: {}", config.llm.model, config.embeddings.model);

    let db = init_db(&config).await?;
    verify_database_schema(&db).await?;
    Ok(())
}

/// Verify that all expected database objects exist
async fn verify_database_schema(db: &Db) -> Result<()> {
    db.with_connection(|conn| {
        let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;
        let tables: Vec<String> = stmt.query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

        let expected_tables = ["docstore_nodes", "index_nodes", "index_structs", "schema_migrations", "storage_locations"];
        let mut all_tables_exist = true;
        for table in &expected_tables {
            if tables.iter().any(|t| t == table) {
                log::debug!("✓ Table exists: {}", table);
            } else {
                log::error!("Missing table: {}", table);
                all_tables_exist = false;
            }
        }
        if !all_tables_exist {
            return Err(RagrouteError::Config("Not all required tables exist".to_string()));
        }

        let applied = migrate::get_applied_migrations(conn)?;
        if applied.is_empty() {
            return Err(RagrouteError::Config("No migrations applied".to_string()));
        }
        log::debug!("✓ {} migrations applied", applied.len());

        let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        if journal_mode.to_uppercase() != "WAL" {
            return Err(RagrouteError::Config(format!("Journal mode is not WAL: {}", journal_mode)));
        }

        let foreign_keys: i32 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
        if foreign_keys != 1 {
            return Err(RagrouteError::Config("Foreign keys not enabled".to_string()));
        }

        let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        if integrity != "ok" {
            return Err(RagrouteError::Config(format!("Database integrity check failed: {}", integrity)));
        }
        log::info!("✓ Database integrity: OK");

        Ok(())
    }).await?;

    log::info!("✓ Database schema verification complete");
    Ok(())
}

fn add_triplet(subject: String, predicate: String, object: String) -> Result<()> {
    let config = Config::load()?;
    let path = &config.graph.graph_store_path;
    let store = SimpleGraphStore::from_file(path)
        .with_context(|| format!("Failed to load graph store {}", path.display()))?;

    let triplet = RelationTriplet::new(subject, predicate, object);
    store.upsert_triplet(triplet.clone())?;
    store.persist(None)?;
    log::info!("Added {} to {}", triplet, path.display());
    Ok(())
}

async fn ask(question: String, docs: Vec<Document>) -> Result<()> {
    let config = Config::load()?;
    init_db(&config).await?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let engine = ChatEngine::from_config(&config)
        .await?
        .with_events(EventSink::new(tx));

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ChatEvent::SubQuestionStarted { sub_question, tool_name } => {
                    log::info!("[{}] {}", tool_name, sub_question)
                }
                ChatEvent::SubQuestionAnswered { tool_name, answer, .. } => {
                    log::debug!("[{}] answered: {}", tool_name, answer)
                }
                ChatEvent::ToolCall { tool_name, input } => log::info!("Calling {} with {:?}", tool_name, input),
                ChatEvent::ToolOutput { tool_name, output } => log::debug!("{} returned: {}", tool_name, output),
            }
        }
    });

    let conversation = Conversation::new(docs);
    let response = engine.chat(&conversation, &question).await?;
    drop(engine);
    let _ = printer.await;

    println!("{}", response.response);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_document_selection() {
        let doc = parse_document("doc-1=https://files/acme-10k.pdf").unwrap();
        assert_eq!(doc.id, "doc-1");
        assert_eq!(doc.url, "https://files/acme-10k.pdf");
        assert!(parse_document("doc-1").is_err());
        assert!(parse_document("=x.pdf").is_err());
    }
}
