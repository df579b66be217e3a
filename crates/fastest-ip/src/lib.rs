// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A [`Resolver`] filter that races a TCP connect against every A/AAAA
//! answer IP a child resolver returned and keeps only the IP whose probe
//! reports back first — successful or not.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dnsmux_core::{ClientContext, ErrorCategory, Metrics, ResolveError, Resolver};
use hickory_proto::op::Message;
use hickory_proto::rr::{RData, Record, RecordType};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const PROBE_DEADLINE: Duration = Duration::from_secs(2);
const DEFAULT_PORT: u16 = 443;

/// Wraps a child resolver and, for A/AAAA questions with at least two answer
/// IPs, races a TCP connect to each on `port` (default 443), keeping only the
/// winner of the race as the sole answer. Falls back to the child's
/// unmodified response whenever there's nothing to race or the race itself
/// doesn't produce a usable answer within the deadline.
pub struct FastestIp {
    id: Arc<str>,
    child: Arc<dyn Resolver>,
    port: u16,
    metrics: Metrics,
}

impl FastestIp {
    pub fn new(id: impl Into<Arc<str>>, child: Arc<dyn Resolver>, port: u16) -> Self {
        let id = id.into();
        Self {
            metrics: Metrics::new("filter", id.clone()),
            id,
            child,
            port: if port == 0 { DEFAULT_PORT } else { port },
        }
    }
}

#[async_trait]
impl Resolver for FastestIp {
    fn id(&self) -> &str {
        &self.id
    }

    async fn resolve(&self, query: Message, ctx: &ClientContext) -> Result<Message, ResolveError> {
        self.metrics.query_add(1);
        let mut response = self.child.resolve(query.clone(), ctx).await?;

        let Some(qtype) = query.queries().first().map(|q| q.query_type()) else {
            return Ok(response);
        };
        if !matches!(qtype, RecordType::A | RecordType::AAAA) {
            return Ok(response);
        }

        let candidates: Vec<(usize, IpAddr)> = response
            .answers()
            .iter()
            .enumerate()
            .filter(|(_, record)| record.record_type() == qtype)
            .filter_map(|(i, record)| record_ip(record).map(|ip| (i, ip)))
            .collect();

        if candidates.len() < 2 {
            return Ok(response);
        }

        let winner = self
            .race(&candidates, |ip, port| async move {
                tokio::net::TcpStream::connect(SocketAddr::new(ip, port))
                    .await
                    .map(drop)
            })
            .await;

        match winner {
            Some(index) => {
                let winner = response.answers()[index].clone();
                response.answers_mut().clear();
                response.answers_mut().push(winner);
                self.metrics
                    .response_add(response.response_code().to_string(), 1);
            }
            None => {
                self.metrics.err_add(&ErrorCategory::Probe, 1);
                debug!(
                    resolver = %self.id,
                    "fastest-ip race produced no usable answer, keeping original response"
                );
            }
        }

        Ok(response)
    }
}

impl FastestIp {
    /// Run `probe` concurrently against every candidate and return the index
    /// of whichever reports back first, successful or not. `probe` is
    /// injected so tests can race deterministic fakes instead of real
    /// sockets; production callers race real TCP connects.
    async fn race<P, Fut>(&self, candidates: &[(usize, IpAddr)], probe: P) -> Option<usize>
    where
        P: Fn(IpAddr, u16) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::io::Result<()>> + Send + 'static,
    {
        let probe = Arc::new(probe);
        let (tx, mut rx) = mpsc::channel(candidates.len());

        for &(index, ip) in candidates {
            let tx = tx.clone();
            let port = self.port;
            let probe = Arc::clone(&probe);
            tokio::spawn(async move {
                let outcome = match probe(ip, port).await {
                    Ok(()) => Ok(index),
                    Err(error) => Err((index, error)),
                };
                let _ = tx.send(outcome).await;
            });
        }
        drop(tx);

        match tokio::time::timeout(PROBE_DEADLINE, rx.recv()).await {
            Ok(Some(Ok(index))) => Some(index),
            Ok(Some(Err((index, error)))) => {
                warn!(
                    resolver = %self.id,
                    candidate = index,
                    %error,
                    "fastest-ip probe race winner failed to connect"
                );
                None
            }
            Ok(None) | Err(_) => None,
        }
    }
}

fn record_ip(record: &Record) -> Option<IpAddr> {
    match record.data() {
        RData::A(addr) => Some(IpAddr::V4((*addr).into())),
        RData::AAAA(addr) => Some(IpAddr::V6((*addr).into())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dnsmux_core::ResolveError;
    use hickory_proto::op::Query;
    use hickory_proto::rr::rdata::{A, AAAA};
    use hickory_proto::rr::Name;
    use std::io;
    use std::net::Ipv4Addr;
    use std::str::FromStr;
    use std::time::Duration;

    struct StaticChild(Message);

    #[async_trait]
    impl Resolver for StaticChild {
        fn id(&self) -> &str {
            "static-child"
        }

        async fn resolve(&self, _query: Message, _ctx: &ClientContext) -> Result<Message, ResolveError> {
            Ok(self.0.clone())
        }
    }

    fn a_response(ips: &[Ipv4Addr]) -> Message {
        let name = Name::from_str("example.com.").unwrap();
        let mut message = Message::query();
        message.add_query(Query::query(name.clone(), RecordType::A));
        for ip in ips {
            message.add_answer(Record::from_rdata(name.clone(), 60, RData::A(A(*ip))));
        }
        message
    }

    fn filter_over(response: Message, port: u16) -> FastestIp {
        FastestIp::new("fastest-ip-test", Arc::new(StaticChild(response)), port)
    }

    #[tokio::test]
    async fn fewer_than_two_candidates_is_untouched() {
        test_support::subscribe();
        let response = a_response(&[Ipv4Addr::new(10, 0, 0, 1)]);
        let filter = filter_over(response.clone(), 443);
        let out = filter
            .resolve(response.clone(), &ClientContext::default())
            .await
            .unwrap();
        assert_eq!(out.answers().len(), 1);
    }

    #[tokio::test]
    async fn non_address_question_is_passed_through() {
        test_support::subscribe();
        let name = Name::from_str("example.com.").unwrap();
        let mut query = Message::query();
        query.add_query(Query::query(name, RecordType::TXT));
        let response = query.clone();
        let filter = filter_over(response.clone(), 443);
        let out = filter.resolve(query, &ClientContext::default()).await.unwrap();
        assert_eq!(out.answers().len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fastest_probe_wins_the_race() {
        test_support::subscribe();
        let ips = [
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Addr::new(10, 0, 0, 3),
        ];
        let response = a_response(&ips);
        let filter = filter_over(response.clone(), 443);

        let delays = [Duration::from_millis(30), Duration::from_millis(10), Duration::from_millis(50)];
        let candidates: Vec<(usize, IpAddr)> = ips.iter().enumerate().map(|(i, ip)| (i, IpAddr::V4(*ip))).collect();

        let winner = filter
            .race(&candidates, move |ip, _port| {
                let IpAddr::V4(ip) = ip else { unreachable!() };
                let index = ips.iter().position(|candidate| *candidate == ip).unwrap();
                let delay = delays[index];
                async move {
                    tokio::time::sleep(delay).await;
                    Ok(())
                }
            })
            .await;

        assert_eq!(winner, Some(1), "the 10ms candidate should win");
    }

    #[tokio::test(start_paused = true)]
    async fn all_probes_failing_falls_back_to_original_response() {
        test_support::subscribe();
        let ips = [Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)];
        let response = a_response(&ips);
        let filter = filter_over(response.clone(), 443);

        let candidates: Vec<(usize, IpAddr)> = ips.iter().enumerate().map(|(i, ip)| (i, IpAddr::V4(*ip))).collect();

        let winner = filter
            .race(&candidates, |_ip, _port| async move {
                Err(io::Error::from(io::ErrorKind::ConnectionRefused))
            })
            .await;

        assert_eq!(winner, None);

        let out = filter
            .resolve(response.clone(), &ClientContext::default())
            .await
            .unwrap();
        assert_eq!(out.answers().len(), 2, "original response is kept unmodified");
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiring_falls_back() {
        test_support::subscribe();
        let ips = [Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)];
        let response = a_response(&ips);
        let filter = filter_over(response.clone(), 443);
        let candidates: Vec<(usize, IpAddr)> = ips.iter().enumerate().map(|(i, ip)| (i, IpAddr::V4(*ip))).collect();

        let winner = filter
            .race(&candidates, |_ip, _port| async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;

        assert_eq!(winner, None);
    }

    #[test]
    fn record_ip_extracts_a_and_aaaa() {
        let a = Record::from_rdata(
            Name::from_str("example.com.").unwrap(),
            60,
            RData::A(A(Ipv4Addr::new(192, 0, 2, 1))),
        );
        assert_eq!(record_ip(&a), Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1))));

        let aaaa = Record::from_rdata(
            Name::from_str("example.com.").unwrap(),
            60,
            RData::AAAA(AAAA(std::net::Ipv6Addr::LOCALHOST)),
        );
        assert_eq!(record_ip(&aaaa), Some(IpAddr::V6(std::net::Ipv6Addr::LOCALHOST)));
    }
}
