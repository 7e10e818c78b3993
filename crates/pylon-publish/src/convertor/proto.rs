//! Protobuf descriptor conversion

use pylon_persistence::ProtoInfo;

use super::ConvertContext;
use crate::model::apisix::ApisixProto;

pub fn convert_protos(ctx: &ConvertContext<'_>, protos: &[ProtoInfo]) -> Vec<ApisixProto> {
    protos
        .iter()
        .map(|proto| ApisixProto {
            id: ctx.scoped_id(&format!("proto-{}", proto.id)),
            desc: proto.name.clone(),
            content: proto.content.clone(),
            labels: ctx.labels(),
        })
        .collect()
}
