//! Test utilities for integration tests.
//!
//! Provides helper functions to set up isolated PostgreSQL containers
//! for each test.

use granary_core::schema::{Column, ColumnType, TableSchema};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

/// Sets up a PostgreSQL container and returns a connection pool.
///
/// Each call creates a fresh, isolated database container. The container is
/// automatically cleaned up when the returned `ContainerAsync` is dropped.
///
/// # Returns
///
/// A tuple of (PgPool, ContainerAsync) - keep the container alive for the test duration.
pub async fn setup_test_db() -> (PgPool, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("postgres", "16-alpine")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "postgres")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let connection_string = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

    // The server restarts once after initdb; retry until it accepts us
    const MAX_RETRIES: u32 = 30;
    let mut retries = 0;
    let pool = loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .connect(&connection_string)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retries += 1;
                if retries >= MAX_RETRIES {
                    panic!(
                        "Failed to connect to database after {} retries: {}",
                        MAX_RETRIES, e
                    );
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    };

    (pool, container)
}

/// Builds a schema from `(name, type)` pairs.
pub fn schema(table: &str, columns: &[(&str, ColumnType)]) -> TableSchema {
    TableSchema {
        table: table.to_string(),
        columns: columns
            .iter()
            .map(|(name, column_type)| Column {
                name: name.to_string(),
                column_type: *column_type,
            })
            .collect(),
    }
}

/// Column names and SQL types of a table, in declaration order.
pub async fn column_types(pool: &PgPool, table: &str) -> Vec<(String, String)> {
    sqlx::query_as(
        r#"
        SELECT column_name::text, data_type::text
        FROM information_schema.columns
        WHERE table_name = $1
        ORDER BY ordinal_position
        "#,
    )
    .bind(table)
    .fetch_all(pool)
    .await
    .expect("Failed to read column types")
}
