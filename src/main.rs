use std::sync::Arc;

use tokio::net::TcpListener;

use debate_arena::clock::SystemClock;
use debate_arena::config::{init_tracing, Config};
use debate_arena::handlers::{build_app, serve};
use debate_arena::judge::HttpJudge;
use debate_arena::storage::{init_db, SqliteStore};
use debate_arena::types::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = Config::from_env();
    let db = init_db(&config.database_url).await?;

    let store = Arc::new(SqliteStore::new(db));
    let judge = Arc::new(HttpJudge::new(config.judge.clone()));
    let clock = Arc::new(SystemClock::new());
    let state = Arc::new(AppState::new(store, judge, clock));

    let app = build_app(state, &config.frontend_origins);
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    serve(listener, app).await
}
