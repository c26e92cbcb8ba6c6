use crate::model::{AggregateReport, ServerDescriptor, ServerResourceSample};
use crate::panel::SampleSource;
use futures::future::join_all;
use std::time::Instant;
use tracing::warn;

const MIB: u64 = 1024 * 1024;

pub async fn aggregate<S>(descriptors: &[ServerDescriptor], source: &S) -> AggregateReport
where
    S: SampleSource + ?Sized,
{
    let start = Instant::now();

    let fetches = descriptors.iter().map(|server| async move {
        match source.fetch_sample(&server.id).await {
            Ok(sample) => Some(sample),
            Err(err) => {
                warn!(
                    server = %server.display_name,
                    server_id = %server.id,
                    error = %err,
                    "resource fetch failed"
                );
                None
            }
        }
    });
    let samples: Vec<Option<ServerResourceSample>> = join_all(fetches).await;
    let elapsed = start.elapsed();

    let mut report = descriptors.iter().zip(&samples).fold(
        AggregateReport::default(),
        |mut acc, (server, sample)| {
            acc.memory_limit_sum = acc
                .memory_limit_sum
                .saturating_add(server.memory_limit_mib.saturating_mul(MIB));
            acc.disk_limit_sum = acc
                .disk_limit_sum
                .saturating_add(server.disk_limit_mib.saturating_mul(MIB));

            match sample {
                Some(s) => {
                    acc.cpu_percent_sum += s.cpu_percent;
                    acc.memory_used_sum = acc.memory_used_sum.saturating_add(s.memory_used_bytes);
                    acc.disk_used_sum = acc.disk_used_sum.saturating_add(s.disk_used_bytes);
                    acc.network_rx_sum = acc.network_rx_sum.saturating_add(s.network_rx_bytes);
                    acc.network_tx_sum = acc.network_tx_sum.saturating_add(s.network_tx_bytes);
                }
                None => acc.failed_samples += 1,
            }
            acc
        },
    );
    report.total_servers = descriptors.len();
    report.elapsed = elapsed;
    report
}
