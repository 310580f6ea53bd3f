//! Metrics tie-ins

use std::net::UdpSocket;

use cadence::{
    BufferedUdpMetricSink, Counter, Gauge, MetricBuilder, NopMetricSink, QueuingMetricSink,
    StatsdClient, StatsdClientBuilder,
};

use crate::errors::Result;
use crate::metric_name::MetricName;

/// Create a cadence StatsdClientBuilder from the given options
pub fn builder(prefix: &str, host: &Option<String>, port: u16) -> Result<StatsdClientBuilder> {
    let builder = if let Some(statsd_host) = host.as_ref() {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(true)?;

        let host = (statsd_host.as_str(), port);
        let udp_sink = BufferedUdpMetricSink::from(host, socket)?;
        let sink = QueuingMetricSink::from(udp_sink);
        StatsdClient::builder(prefix, sink)
    } else {
        StatsdClient::builder(prefix, NopMetricSink)
    };
    Ok(builder.with_error_handler(|err| error!("Metrics send error: {}", err)))
}

/// Create a cadence StatsdClient from the given options
pub fn new_metrics(prefix: &str, host: &Option<String>, port: u16) -> Result<StatsdClient> {
    Ok(builder(prefix, host, port)?.build())
}

/// [`StatsdClient`] helpers taking [`MetricName`] instead of a string literal
pub trait StatsdClientExt {
    fn incr_with_tags(&self, metric: MetricName) -> MetricBuilder<'_, '_, Counter>;
    fn count_with_tags(&self, metric: MetricName, count: i64) -> MetricBuilder<'_, '_, Counter>;
    fn gauge_with_tags(&self, metric: MetricName, value: u64) -> MetricBuilder<'_, '_, Gauge>;
}

impl StatsdClientExt for StatsdClient {
    fn incr_with_tags(&self, metric: MetricName) -> MetricBuilder<'_, '_, Counter> {
        let name: &'static str = metric.into();
        cadence::Counted::count_with_tags(self, name, 1)
    }

    fn count_with_tags(&self, metric: MetricName, count: i64) -> MetricBuilder<'_, '_, Counter> {
        let name: &'static str = metric.into();
        cadence::Counted::count_with_tags(self, name, count)
    }

    fn gauge_with_tags(&self, metric: MetricName, value: u64) -> MetricBuilder<'_, '_, Gauge> {
        let name: &'static str = metric.into();
        cadence::Gauged::gauge_with_tags(self, name, value)
    }
}
