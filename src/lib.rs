#![deny(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

/*!
Rust client for finding services located by DNS SRV records.

# Introduction

SRV Records, as defined in [RFC 2782](https://tools.ietf.org/html/rfc2782),
are DNS records of the form

`_Service._Proto.Name TTL Class SRV Priority Weight Port Target`

For instance, a DNS server might respond with the following SRV records for
`_http._tcp.example.com`:

```text
_http._tcp.example.com. 60 IN SRV 1 100 443 test1.example.com.
_http._tcp.example.com. 60 IN SRV 2 50  443 test2.example.com.
_http._tcp.example.com. 60 IN SRV 2 50  443 test3.example.com.
```

A client wanting to communicate with this example service should use
`test1.example.com:443` (the record with the lowest priority), and only use
the other two (picked at random in proportion to their weights) once the
first record disappears.

`srvclient` asks the nameservers itself, picks a target the same way, and
hands back an address to connect to:

```no_run
# #[tokio::main]
# async fn main() -> Result<(), srvclient::Error> {
use srvclient::SrvClient;
let client = SrvClient::new();
let address = client.srv("_http._tcp.example.com").await?;
// Connect to `address`, e.g. "10.0.0.1:443"
# Ok(())
# }
```

[`SrvClient::new`] creates a client (that should be reused, or cloned, to
take advantage of request coalescing and caching) asking the nameservers in
`/etc/resolv.conf`. [`SrvClient::srv`] picks one target, [`SrvClient::all_srv`]
lists every target in preference order, and [`SrvClient::maybe_srv`] falls
back to the given name when the lookup fails.

# Queries

Queries go over UDP with an EDNS0 payload size of 4096 bytes (see
[`SrvClient::udp_size`]). A truncated response is retried over TCP against
the same nameserver unless [`SrvClient::ignore_truncated`] is set, and a
nameserver rejecting EDNS0 with FORMERR is asked again without it.
Nameservers are tried in order until one answers.

# Coalescing and Caching

With [`SrvClient::single_in_flight`], concurrent lookups of the same name share
one query. With [`SrvClient::cache_last`], a failed lookup is answered with the
last successful response for the name; the failure is then reported through
[`Answer::warning`] instead of as an error.

# Alternative Nameservers and Transports

Nameservers come from a [`ConfigSource`]: by default [`ResolvConf`], re-read
when the file changes, or a fixed list through [`SrvClient::resolver_addrs`].
Queries are sent by an [`Exchanger`], which can be replaced for testing.

[`ConfigSource`]: resolver::ConfigSource
[`ResolvConf`]: resolver::ResolvConf
[`Exchanger`]: resolver::Exchanger
*/

mod client;
pub use client::{policy, Answer, Error, Lookup, SrvClient, Stats};

mod record;
pub use record::{ResolvedSet, ServiceRecord, SrvRecord};

pub mod resolver;
