use sea_orm_migration::prelude::*;

#[tokio::main]
async fn main() {
    cli::run_cli(admissions_gateway_migration::Migrator).await;
}
