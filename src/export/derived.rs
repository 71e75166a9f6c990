use std::sync::Arc;

use prometheus::core::{Collector, Desc, Describer};
use prometheus::proto::{self, MetricFamily};
use prometheus::Opts;

use crate::state::StateStore;

/// A counter whose value is read from the [`StateStore`] at scrape time.
///
/// Reports `fallback` until something has been published under `key`.
pub struct StoreCounter {
    desc: Desc,
    store: Arc<StateStore>,
    key: &'static str,
    fallback: f64,
}

impl StoreCounter {
    pub fn new(
        opts: Opts,
        store: Arc<StateStore>,
        key: &'static str,
        fallback: f64,
    ) -> prometheus::Result<Self> {
        let desc = opts.describe()?;
        Ok(Self {
            desc,
            store,
            key,
            fallback,
        })
    }
}

impl Collector for StoreCounter {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.desc]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let mut counter = proto::Counter::default();
        counter.set_value(self.store.get_or(self.key, self.fallback));

        let mut metric = proto::Metric::default();
        metric.set_counter(counter);

        let mut family = MetricFamily::default();
        family.set_name(self.desc.fq_name.clone());
        family.set_help(self.desc.help.clone());
        family.set_field_type(proto::MetricType::COUNTER);
        family.mut_metric().push(metric);

        vec![family]
    }
}
