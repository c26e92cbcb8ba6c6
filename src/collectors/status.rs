use crate::model::{ServerDescriptor, ServerStatus, Severity, StatusTally};
use tracing::debug;

pub fn classify(descriptors: &[ServerDescriptor]) -> StatusTally {
    let mut tally = StatusTally {
        total: descriptors.len(),
        ..StatusTally::default()
    };

    for server in descriptors {
        match &server.status {
            ServerStatus::Running => tally.online += 1,
            ServerStatus::Offline => tally.offline += 1,
            ServerStatus::Starting | ServerStatus::Stopping | ServerStatus::Installing => {
                tally.transitioning += 1
            }
            ServerStatus::Suspended => tally.suspended += 1,
            ServerStatus::Unknown(raw) => {
                debug!(
                    server = %server.display_name,
                    server_id = %server.id,
                    status = raw.as_deref().unwrap_or("<none>"),
                    "unrecognized server status"
                );
                tally.unrecognized += 1;
            }
        }
    }

    tally
}

pub fn severity(tally: &StatusTally) -> Severity {
    if tally.total > 0 && tally.offline == tally.total {
        Severity::Red
    } else if tally.offline > 0 || tally.suspended > 0 {
        Severity::Amber
    } else {
        Severity::Green
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(status: ServerStatus) -> ServerDescriptor {
        ServerDescriptor {
            id: "id".to_string(),
            display_name: "name".to_string(),
            status,
            memory_limit_mib: 0,
            disk_limit_mib: 0,
        }
    }

    fn tally(offline: usize, suspended: usize, total: usize) -> StatusTally {
        StatusTally {
            offline,
            suspended,
            total,
            online: total - offline - suspended,
            ..StatusTally::default()
        }
    }

    #[test]
    fn buckets_every_known_state() {
        let servers = vec![
            server(ServerStatus::Running),
            server(ServerStatus::Running),
            server(ServerStatus::Offline),
            server(ServerStatus::Starting),
            server(ServerStatus::Stopping),
            server(ServerStatus::Installing),
            server(ServerStatus::Suspended),
        ];

        let t = classify(&servers);

        assert_eq!(t.total, 7);
        assert_eq!(t.online, 2);
        assert_eq!(t.offline, 1);
        assert_eq!(t.transitioning, 3);
        assert_eq!(t.suspended, 1);
        assert_eq!(t.unrecognized, 0);
    }

    #[test]
    fn unrecognized_states_stay_out_of_named_buckets() {
        let servers = vec![
            server(ServerStatus::Running),
            server(ServerStatus::Unknown(None)),
            server(ServerStatus::Unknown(Some("restoring_backup".to_string()))),
        ];

        let t = classify(&servers);

        assert_eq!(t.total, servers.len());
        assert_eq!(t.unrecognized, 2);
        assert_eq!(t.online + t.offline + t.transitioning + t.suspended, t.total - 2);
    }

    #[test]
    fn severity_table() {
        assert_eq!(severity(&tally(3, 0, 3)), Severity::Red);
        assert_eq!(severity(&tally(1, 0, 3)), Severity::Amber);
        assert_eq!(severity(&tally(0, 0, 3)), Severity::Green);
        assert_eq!(severity(&tally(0, 2, 5)), Severity::Amber);
        assert_eq!(severity(&StatusTally::default()), Severity::Green);
    }
}
