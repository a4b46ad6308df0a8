//! Postgres-backed harness for the reservation workflows.
//!
//! Each test starts its own Postgres 16 container and runs the crate's
//! migrations against it. Docker must be running; the tests are ignored by
//! default. Run them with `cargo test -- --ignored`.

#![allow(dead_code)]

use boxoffice_server::models::{Ticket, TicketType};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use uuid::Uuid;

pub struct TestDb {
    pub pool: PgPool,
    _container: ContainerAsync<Postgres>,
}

impl TestDb {
    pub async fn start() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let container = Postgres::default()
            .with_tag("16")
            .start()
            .await
            .expect("Failed to start Postgres container");

        let host = container.get_host().await.expect("container host");
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("container port");
        let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

        let mut retries = 0;
        let pool = loop {
            match PgPoolOptions::new().max_connections(40).connect(&url).await {
                Ok(pool) => break pool,
                Err(e) => {
                    assert!(retries < 30, "Postgres never became ready: {}", e);
                    retries += 1;
                    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                }
            }
        };

        sqlx::migrate!()
            .run(&pool)
            .await
            .expect("Failed to run migrations");

        Self {
            pool,
            _container: container,
        }
    }

    pub async fn event(&self, title: &str) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO events (id, title) VALUES ($1, $2)")
            .bind(id)
            .bind(title)
            .execute(&self.pool)
            .await
            .expect("insert event");
        id
    }

    pub async fn ticket_type(
        &self,
        event_id: Uuid,
        name: &str,
        unit_price_minor: i64,
        capacity: Option<i32>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO ticket_types (id, event_id, name, unit_price_minor, capacity)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(event_id)
        .bind(name)
        .bind(unit_price_minor)
        .bind(capacity)
        .execute(&self.pool)
        .await
        .expect("insert ticket type");
        id
    }

    pub async fn counters(&self, ticket_type_id: Uuid) -> TicketType {
        sqlx::query_as::<_, TicketType>("SELECT * FROM ticket_types WHERE id = $1")
            .bind(ticket_type_id)
            .fetch_one(&self.pool)
            .await
            .expect("read ticket type")
    }

    pub async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await
            .expect("count rows")
    }

    pub async fn tickets_for_hold(&self, hold_id: Uuid) -> Vec<Ticket> {
        sqlx::query_as::<_, Ticket>(
            "SELECT t.* FROM tickets t
             JOIN orders o ON o.id = t.order_id
             WHERE o.hold_id = $1
             ORDER BY t.id",
        )
        .bind(hold_id)
        .fetch_all(&self.pool)
        .await
        .expect("read tickets")
    }

    /// `held` must equal the units on active holds, and capacity must hold.
    pub async fn assert_inventory_consistent(&self) {
        let rows: Vec<(Uuid, i32, i32, Option<i32>, i64)> = sqlx::query_as(
            "SELECT tt.id, tt.sold, tt.held, tt.capacity,
                    COALESCE((
                        SELECT SUM(hi.qty) FROM hold_items hi
                        JOIN holds h ON h.id = hi.hold_id
                        WHERE hi.ticket_type_id = tt.id AND h.status = 'ACTIVE'
                    ), 0)::BIGINT
             FROM ticket_types tt",
        )
        .fetch_all(&self.pool)
        .await
        .expect("read inventory");

        for (id, sold, held, capacity, active_units) in rows {
            assert_eq!(
                i64::from(held),
                active_units,
                "held drifted from active holds for ticket type {}",
                id
            );
            if let Some(capacity) = capacity {
                assert!(sold + held <= capacity, "ticket type {} oversold", id);
            }
        }
    }
}
