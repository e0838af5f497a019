//! Basic usage example for the exadriver client.

use exadriver::{Driver, DriverConfig, Parameter, Pool, PoolConfig};
use std::error::Error;

const HOST: &str = "localhost";
const PORT: u16 = 8563;
const USER: &str = "sys";
const PASSWORD: &str = "exasol";
const VALIDATE_CERT: bool = false; // Set to false for Docker/self-signed certs
const SCHEMA: &str = "exadriver";

fn example_config() -> Result<DriverConfig, Box<dyn Error>> {
    let conn_string = format!(
        "exasol://{}:{}@{}:{}?encryption=true&validate_certificate={}",
        USER, PASSWORD, HOST, PORT, VALIDATE_CERT
    );
    Ok(conn_string.parse()?)
}

/// Executes a simple arithmetic query and returns the row count.
async fn example_simple_select(driver: &Driver) -> Result<usize, Box<dyn Error>> {
    let result = driver.query("SELECT 1+1").await?;
    Ok(result.num_rows())
}

/// Creates a table, fills it through a prepared statement and reads it back.
async fn example_prepared(driver: &Driver) -> Result<usize, Box<dyn Error>> {
    // Ignore the error if the schema already exists
    let _ = driver.execute(&format!("CREATE SCHEMA {}", SCHEMA)).await;

    driver
        .execute(&format!(
            "CREATE TABLE {}.test_example (id INT, name VARCHAR(100))",
            SCHEMA
        ))
        .await?;

    let statement = driver
        .prepare(&format!("INSERT INTO {}.test_example VALUES (?, ?)", SCHEMA))
        .await?;
    let rows: Vec<Parameter> = vec![
        1.into(),
        "Alice".into(),
        2.into(),
        "Bob".into(),
        3.into(),
        "Charlie".into(),
    ];
    statement.execute(rows).await?;
    statement.close().await?;

    let result = driver
        .query(&format!(
            "SELECT id, name FROM {}.test_example ORDER BY id",
            SCHEMA
        ))
        .await?;
    for row in result.row_maps() {
        println!("  {:?}", row);
    }

    driver
        .execute(&format!("DROP TABLE {}.test_example", SCHEMA))
        .await?;
    driver.execute(&format!("DROP SCHEMA {}", SCHEMA)).await?;
    Ok(result.num_rows())
}

/// Runs a handful of queries concurrently through a pool.
async fn example_pool(config: DriverConfig) -> Result<usize, Box<dyn Error>> {
    let pool = Pool::new(config, PoolConfig::new(1, 4)?);

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let pool = pool.clone();
            tokio::spawn(async move { pool.query(&format!("SELECT {} AS n", i)).await })
        })
        .collect();

    let mut rows = 0;
    for task in tasks {
        rows += task.await??.num_rows();
    }

    pool.drain().await;
    pool.clear().await;
    Ok(rows)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = example_config()?;
    let driver = Driver::new(config.clone());
    driver.connect().await?;
    if let Some(session) = driver.session() {
        println!("Connected: session {}", session.session_id);
    }

    let rows = example_simple_select(&driver).await?;
    println!("Simple select: {} row(s)", rows);

    let rows = example_prepared(&driver).await?;
    println!("Prepared insert: {} row(s)", rows);

    driver.close().await?;

    let rows = example_pool(config).await?;
    println!("Pool: {} row(s)", rows);

    println!("Done");
    Ok(())
}
