//! Per-question query logic, registered as the request handler for both
//! protocol servers.

use std::sync::Arc;
use std::time::Instant;

use hickory_proto::op::ResponseCode;
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{Name, RData, Record};
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use tracing::{debug, error, info, warn};
use warren_dns_domain::strip_tunnel_name;

use crate::dns::cache::AnswerCache;
use crate::tunnel::RemoteResolver;

/// TTL for records resolved across the tunnel.
const ANSWER_TTL: u32 = 10;

#[derive(Clone)]
pub struct TunnelQueryHandler {
    domain: Arc<str>,
    cache: Arc<AnswerCache>,
    resolver: RemoteResolver,
}

impl TunnelQueryHandler {
    pub(crate) fn new(domain: Arc<str>, cache: Arc<AnswerCache>, resolver: RemoteResolver) -> Self {
        Self {
            domain,
            cache,
            resolver,
        }
    }

    /// Resolves one question: cached answers are reused and refreshed;
    /// names under the delegated domain cost one tunnel round trip and
    /// are cached on success. An empty return means the question is
    /// unanswerable, which is not an error: the response is still sent
    /// with whatever answers accumulated.
    pub(crate) async fn resolve_question(&self, name: &Name, now: Instant) -> Vec<Record> {
        let qname = name.to_string();

        if let Some(records) = self.cache.lookup(&qname) {
            debug!(name = %qname, "answering from cache");
            self.cache.touch(&qname, now);
            return records;
        }

        let Some(host) = strip_tunnel_name(&qname, &self.domain) else {
            debug!(name = %qname, "name outside the delegated domain");
            return Vec::new();
        };

        let addresses = self.resolver.resolve(&host).await;
        info!(name = %qname, addresses = addresses.len(), "tunnel lookup finished");
        if addresses.is_empty() {
            return Vec::new();
        }

        let records = build_answers(name, &addresses);
        if records.is_empty() {
            return Vec::new();
        }
        self.cache.insert(qname, records.clone(), now);
        records
    }
}

fn build_answers(name: &Name, addresses: &[String]) -> Vec<Record> {
    let mut records = Vec::with_capacity(addresses.len());
    for address in addresses {
        match address.parse() {
            Ok(ip) => records.push(Record::from_rdata(
                name.clone(),
                ANSWER_TTL,
                RData::A(A(ip)),
            )),
            Err(_) => warn!(%address, "peer returned an unparseable IPv4 address"),
        }
    }
    records
}

#[async_trait::async_trait]
impl RequestHandler for TunnelQueryHandler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        let now = Instant::now();
        self.cache.sweep(now);

        let request_info = match request.request_info() {
            Ok(info) => info,
            Err(e) => {
                error!(error = %e, "failed to parse request info");
                return send_error_response(request, &mut response_handle, ResponseCode::FormErr)
                    .await;
            }
        };

        let query = &request_info.query;
        let name = query.original().name().clone();
        info!(
            name = %name,
            record_type = ?query.query_type(),
            client = %request.src().ip(),
            "DNS query received"
        );

        let answers = self.resolve_question(&name, now).await;
        debug!(name = %name, answers = answers.len(), "sending response");

        let builder = MessageResponseBuilder::from_message_request(request);
        let mut header = *request.header();
        header.set_recursion_available(true);
        let response = builder.build(header, answers.iter(), &[], &[], &[]);

        match response_handle.send_response(response).await {
            Ok(info) => info,
            Err(e) => {
                error!(error = %e, "failed to send response");
                ResponseInfo::from(*request.header())
            }
        }
    }
}

async fn send_error_response<R: ResponseHandler>(
    request: &Request,
    response_handle: &mut R,
    code: ResponseCode,
) -> ResponseInfo {
    debug!(code = ?code, "sending error response");
    let builder = MessageResponseBuilder::from_message_request(request);
    let mut header = *request.header();
    header.set_response_code(code);
    let response = builder.build(header, &[], &[], &[], &[]);

    match response_handle.send_response(response).await {
        Ok(info) => info,
        Err(e) => {
            error!(error = %e, "failed to send error response");
            ResponseInfo::from(*request.header())
        }
    }
}
