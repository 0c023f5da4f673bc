use std::sync::Arc;

use crate::{
    config::{ConfigLoader, SettlementConfig},
    notification::{DeliveryHandler, NotificationFanout, NotificationTransport},
    queue::{TaskKind, TaskQueue, Worker},
    rating::{Glicko2, RatingAlgorithm, RatingTaskHandler, RatingUpdater},
    settlement::SettlementService,
    shared::AppState,
    stats::StatsRecalculator,
    store::Datastore,
};

/// Every settlement component, wired to one store and queue, with a worker
/// that has a handler for each task kind.
pub struct Pipeline {
    pub store: Arc<dyn Datastore>,
    pub queue: Arc<dyn TaskQueue>,
    pub settlement: Arc<SettlementService>,
    pub updater: Arc<RatingUpdater>,
    pub stats: Arc<StatsRecalculator>,
    pub fanout: Arc<NotificationFanout>,
    pub worker: Arc<Worker>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn Datastore>,
        queue: Arc<dyn TaskQueue>,
        config: &SettlementConfig,
        loader: Arc<ConfigLoader>,
        transport: Arc<dyn NotificationTransport>,
    ) -> Self {
        let glicko = Arc::new(Glicko2::from_config(&config.rating));
        let default_rating = glicko.default_rating();

        let settlement = Arc::new(SettlementService::new(
            Arc::clone(&store),
            config.rating.settle_delay,
        ));
        let updater = Arc::new(RatingUpdater::new(Arc::clone(&store), glicko));
        let stats = Arc::new(StatsRecalculator::new(
            Arc::clone(&store),
            default_rating,
            config.stats.delay,
        ));
        let fanout = Arc::new(NotificationFanout::new(Arc::clone(&store), loader));

        let rating_handler = Arc::new(RatingTaskHandler::new(Arc::clone(&updater)));
        let delivery = Arc::new(DeliveryHandler::new(Arc::clone(&store), transport));
        let worker = Worker::new(Arc::clone(&queue), config.worker.clone())
            .with_handler(TaskKind::UpdateRatings, rating_handler.clone())
            .with_handler(TaskKind::Rerate, rating_handler)
            .with_handler(TaskKind::UpdateUserStats, stats.chain())
            .with_handler(TaskKind::NotifyUsers, fanout.user_chain())
            .with_handler(TaskKind::NotifyDevices, fanout.device_chain())
            .with_handler(TaskKind::DeliverPush, delivery.clone())
            .with_handler(TaskKind::DeliverMail, delivery);

        Self {
            store,
            queue,
            settlement,
            updater,
            stats,
            fanout,
            worker: Arc::new(worker),
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(
            Arc::clone(&self.store),
            Arc::clone(&self.queue),
            Arc::clone(&self.updater),
            Arc::clone(&self.stats),
        )
    }
}
