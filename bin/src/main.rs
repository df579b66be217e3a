// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Thin demo binary: wire a fastest-IP filter over a DoH client over a
//! chosen HTTPS transport, issue one query, print the answer. No listener,
//! no config file, no dynamic reload — see the crate docs for scope.

use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use clap::Parser;
use dnsmux_core::{ClientContext, Resolver};
use dnsmux_doh::DohClientBuilder;
use dnsmux_fastest_ip::FastestIp;
use dnsmux_transport::{QuicHttpsTransportBuilder, RoundTrip, TcpHttpsTransportBuilder};
use hickory_proto::op::{Message, Query};
use hickory_proto::rr::{Name, RecordType};

#[derive(Parser, Debug)]
#[command(name = "dnsmux", about = "Issue one DNS-over-HTTPS query through a fastest-IP filter")]
struct Cli {
    /// RFC 6570 URI template for the DoH endpoint, e.g. https://dns.example/dns-query{?dns}
    template: String,

    /// Hostname of the DoH server, used for TLS SNI and, for the QUIC
    /// transport, as the dial target.
    host: String,

    /// Domain name to resolve.
    name: String,

    /// Port to connect to on `host`.
    #[arg(long, default_value_t = 443)]
    port: u16,

    /// Record type to query.
    #[arg(long, value_enum, default_value_t = QueryType::A)]
    record_type: QueryType,

    /// HTTP method used to send the query: get or post.
    #[arg(long, default_value = "post")]
    method: String,

    /// Which HTTPS transport carries the DoH request.
    #[arg(long, value_enum, default_value_t = TransportKind::Tcp)]
    transport: TransportKind,

    /// Skip resolving `host`; dial this IP instead. SNI and certificate
    /// verification still use `host`.
    #[arg(long)]
    bootstrap: Option<IpAddr>,

    /// Pin the local address used for outbound connections.
    #[arg(long)]
    source: Option<IpAddr>,

    /// Port the fastest-IP filter's TCP probes connect to (0 selects 443).
    #[arg(long, default_value_t = 0)]
    probe_port: u16,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
enum QueryType {
    A,
    Aaaa,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
enum TransportKind {
    Tcp,
    Quic,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let transport: Arc<dyn RoundTrip> = match cli.transport {
        TransportKind::Tcp => {
            let mut builder = TcpHttpsTransportBuilder::new();
            if let Some(ip) = cli.bootstrap {
                builder = builder.bootstrap(ip);
            }
            if let Some(ip) = cli.source {
                builder = builder.source(ip);
            }
            Arc::new(builder.build()?)
        }
        TransportKind::Quic => {
            let mut builder = QuicHttpsTransportBuilder::new();
            if let Some(ip) = cli.bootstrap {
                builder = builder.bootstrap(ip);
            }
            if let Some(ip) = cli.source {
                builder = builder.source(ip);
            }
            Arc::new(builder.build(&cli.host, cli.port).await?)
        }
    };

    let method = dnsmux_doh::Method::parse(&cli.method)?;
    let doh = DohClientBuilder::new("cli-doh", cli.template)
        .method(method)
        .build(transport)?;

    let resolver: Arc<dyn Resolver> = Arc::new(doh);
    let filter = FastestIp::new("cli-fastest-ip", resolver, cli.probe_port);

    let record_type = match cli.record_type {
        QueryType::A => RecordType::A,
        QueryType::Aaaa => RecordType::AAAA,
    };
    let name = Name::from_str(&cli.name)?;

    let mut query = Message::query();
    query.add_query(Query::query(name, record_type));

    let ctx = ClientContext::new("cli");
    let response = filter.resolve(query, &ctx).await?;

    if response.answers().is_empty() {
        println!("no answers (rcode {})", response.response_code());
        return Ok(());
    }

    for record in response.answers() {
        println!(
            "{}\t{}\t{}\t{:?}",
            record.name(),
            record.ttl(),
            record.record_type(),
            record.data()
        );
    }

    Ok(())
}
