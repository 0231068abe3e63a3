//! The `status` command: queue depths, slots, and bucket occupancy.

use anyhow::Result;

use faultline_core::ratelimit::RateLimiter;
use faultline_db::models::RateService;
use faultline_db::pool;
use faultline_db::queries::queue;

use crate::config::ResolvedConfig;

pub async fn run(resolved: ResolvedConfig) -> Result<()> {
    let db = pool::create_pool(&resolved.db).await?;

    let (ready, delayed, dead) = queue::tier_lengths(&db).await?;
    let (in_use, max_slots) = queue::slot_usage(&db).await?;

    println!("queue:   {ready} ready, {delayed} delayed, {dead} dead");
    println!("slots:   {in_use}/{max_slots} in use");

    let limiter = RateLimiter::new(db.clone(), &resolved.engine.rate_limiting);
    for service in [
        RateService::RestartPedestal,
        RateService::BuildContainer,
        RateService::AlgoExecution,
    ] {
        let occupancy = limiter.occupancy(service).await?;
        println!(
            "tokens:  {service} {occupancy}/{}",
            limiter.capacity(service)
        );
    }

    if dead > 0 {
        println!("\ndead-letter tasks (oldest first):");
        for task in queue::list_dead(&db, 20).await? {
            println!("  {} {} restarts={}", task.id, task.kind, task.restart_num);
        }
    }

    Ok(())
}
