use crate::dns::{DNSPacket, enums::ResponseCode, header::DNSHeader};
use crate::resolver::ZoneResolver;
use tracing::debug;

/// Turns a request into the authoritative reply for it.
///
/// Every question is answered on its own and the results are concatenated
/// in question order. A question with no records contributes the zone SOA
/// to the authority section instead.
#[derive(Clone)]
pub struct ReplyAssembler {
    resolver: ZoneResolver,
}

impl ReplyAssembler {
    pub fn new(resolver: ZoneResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &ZoneResolver {
        &self.resolver
    }

    pub async fn build_reply(&self, request: &DNSPacket) -> DNSPacket {
        let mut reply = DNSPacket {
            header: DNSHeader {
                id: request.header.id,
                qr: true,
                opcode: request.header.opcode,
                aa: true,
                tc: false,
                rd: request.header.rd,
                ra: false,
                z: 0,
                rcode: ResponseCode::NoError.to_u8(),
                ..Default::default()
            },
            questions: request.questions.clone(),
            ..Default::default()
        };

        for question in &request.questions {
            let records = self.resolver.resolve(&question.name, question.qtype).await;
            if records.is_empty() {
                debug!("No data for {} {}, adding SOA to authority", question.qtype, question.name);
                reply.authorities.push(self.resolver.soa());
            } else {
                debug!("Answering {} {} with {} record(s)", question.qtype, question.name, records.len());
                reply.answers.extend(records);
            }
        }

        reply.header.qdcount = reply.questions.len() as u16;
        reply.header.ancount = reply.answers.len() as u16;
        reply.header.nscount = reply.authorities.len() as u16;
        reply
    }
}
