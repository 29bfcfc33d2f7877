//! Conversions between performatives and described lists.
//!
//! Every composite is a described list whose fields are positional. Encoding
//! trims trailing null fields; decoding treats missing fields as null.
use super::{AmqpCodec, LCodec, RCodec, WCodec};
use crate::{
    buffers::{
        reader::{DidntRead, Reader},
        writer::{DidntWrite, Writer},
    },
    error::{AmqpError, ErrorCondition},
    protocol::{
        Attach, Begin, Close, DeliveryState, DeliveryTag, Descriptor, Detach, Disposition, End, Fields, Flow, Open,
        Performative, ReceiverSettleMode, Role, SenderSettleMode, Source, Symbol, Target, Transfer, Value, code,
    },
};

const NAMES: &[(&str, u64)] = &[
    ("amqp:open:list", code::OPEN),
    ("amqp:begin:list", code::BEGIN),
    ("amqp:attach:list", code::ATTACH),
    ("amqp:flow:list", code::FLOW),
    ("amqp:transfer:list", code::TRANSFER),
    ("amqp:disposition:list", code::DISPOSITION),
    ("amqp:detach:list", code::DETACH),
    ("amqp:end:list", code::END),
    ("amqp:close:list", code::CLOSE),
    ("amqp:error:list", code::ERROR),
    ("amqp:source:list", code::SOURCE),
    ("amqp:target:list", code::TARGET),
    ("amqp:received:list", DeliveryState::RECEIVED),
    ("amqp:accepted:list", DeliveryState::ACCEPTED),
    ("amqp:rejected:list", DeliveryState::REJECTED),
    ("amqp:released:list", DeliveryState::RELEASED),
    ("amqp:modified:list", DeliveryState::MODIFIED),
    ("amqp:transactional-state:list", DeliveryState::TRANSACTIONAL),
];

fn descriptor_code(d: &Descriptor) -> Option<u64> {
    match d {
        Descriptor::Code(c) => Some(*c),
        Descriptor::Name(n) => NAMES.iter().find(|(s, _)| *s == n.as_str()).map(|(_, c)| *c),
    }
}

/// Builds a described list, dropping trailing nulls.
fn described_list(code: u64, mut fields: Vec<Value>) -> Value {
    while fields.last().is_some_and(Value::is_null) {
        fields.pop();
    }
    Value::described(code, Value::List(fields))
}

fn flag(b: bool) -> Value {
    if b { Value::Bool(true) } else { Value::Null }
}

fn opt_u32(v: Option<u32>) -> Value {
    Value::option(v, Value::UInt)
}

fn opt_string(v: &Option<String>) -> Value {
    Value::option(v.clone(), Value::String)
}

fn opt_symbol(v: &Option<Symbol>) -> Value {
    Value::option(v.clone(), Value::Symbol)
}

pub(crate) fn error_to_value(e: &AmqpError) -> Value {
    described_list(
        code::ERROR,
        vec![
            Value::Symbol(Symbol::from(e.condition.as_str())),
            opt_string(&e.description),
            Value::fields(&e.info),
        ],
    )
}

fn opt_error(e: &Option<AmqpError>) -> Value {
    e.as_ref().map_or(Value::Null, error_to_value)
}

pub(crate) fn state_to_value(s: &DeliveryState) -> Value {
    match s {
        DeliveryState::Received {
            section_number,
            section_offset,
        } => described_list(
            DeliveryState::RECEIVED,
            vec![Value::UInt(*section_number), Value::ULong(*section_offset)],
        ),
        DeliveryState::Accepted => described_list(DeliveryState::ACCEPTED, vec![]),
        DeliveryState::Rejected { error } => described_list(DeliveryState::REJECTED, vec![opt_error(error)]),
        DeliveryState::Released => described_list(DeliveryState::RELEASED, vec![]),
        DeliveryState::Modified {
            delivery_failed,
            undeliverable_here,
            message_annotations,
        } => described_list(
            DeliveryState::MODIFIED,
            vec![
                flag(*delivery_failed),
                flag(*undeliverable_here),
                Value::fields(message_annotations),
            ],
        ),
        DeliveryState::Transactional { txn_id, outcome } => described_list(
            DeliveryState::TRANSACTIONAL,
            vec![
                Value::Binary(txn_id.clone()),
                outcome.as_deref().map_or(Value::Null, state_to_value),
            ],
        ),
    }
}

fn opt_state(s: &Option<DeliveryState>) -> Value {
    s.as_ref().map_or(Value::Null, state_to_value)
}

fn source_to_value(s: &Source) -> Value {
    described_list(
        code::SOURCE,
        vec![
            opt_string(&s.address),
            Value::UInt(s.durable),
            opt_symbol(&s.expiry_policy),
            Value::UInt(s.timeout),
            flag(s.dynamic),
            Value::fields(&s.dynamic_node_properties),
            opt_symbol(&s.distribution_mode),
            Value::fields(&s.filter),
            opt_state(&s.default_outcome),
            Value::symbols(&s.outcomes),
            Value::symbols(&s.capabilities),
        ],
    )
}

fn target_to_value(t: &Target) -> Value {
    described_list(
        code::TARGET,
        vec![
            opt_string(&t.address),
            Value::UInt(t.durable),
            opt_symbol(&t.expiry_policy),
            Value::UInt(t.timeout),
            flag(t.dynamic),
            Value::fields(&t.dynamic_node_properties),
            Value::symbols(&t.capabilities),
        ],
    )
}

pub(crate) fn to_value(p: &Performative) -> Value {
    let fields = match p {
        Performative::Open(o) => vec![
            Value::String(o.container_id.clone()),
            opt_string(&o.hostname),
            Value::UInt(o.max_frame_size),
            Value::UShort(o.channel_max),
            opt_u32(o.idle_time_out),
            Value::symbols(&o.outgoing_locales),
            Value::symbols(&o.incoming_locales),
            Value::symbols(&o.offered_capabilities),
            Value::symbols(&o.desired_capabilities),
            Value::fields(&o.properties),
        ],
        Performative::Begin(b) => vec![
            Value::option(b.remote_channel, Value::UShort),
            Value::UInt(b.next_outgoing_id),
            Value::UInt(b.incoming_window),
            Value::UInt(b.outgoing_window),
            Value::UInt(b.handle_max),
            Value::symbols(&b.offered_capabilities),
            Value::symbols(&b.desired_capabilities),
            Value::fields(&b.properties),
        ],
        Performative::Attach(a) => vec![
            Value::String(a.name.clone()),
            Value::UInt(a.handle),
            Value::Bool(a.role.as_bool()),
            Value::UByte(a.snd_settle_mode as u8),
            Value::UByte(a.rcv_settle_mode as u8),
            a.source.as_ref().map_or(Value::Null, source_to_value),
            a.target.as_ref().map_or(Value::Null, target_to_value),
            Value::Null,
            flag(a.incomplete_unsettled),
            opt_u32(a.initial_delivery_count),
            Value::option(a.max_message_size, Value::ULong),
            Value::symbols(&a.offered_capabilities),
            Value::symbols(&a.desired_capabilities),
            Value::fields(&a.properties),
        ],
        Performative::Flow(f) => vec![
            opt_u32(f.next_incoming_id),
            Value::UInt(f.incoming_window),
            Value::UInt(f.next_outgoing_id),
            Value::UInt(f.outgoing_window),
            opt_u32(f.handle),
            opt_u32(f.delivery_count),
            opt_u32(f.link_credit),
            opt_u32(f.available),
            flag(f.drain),
            flag(f.echo),
            Value::fields(&f.properties),
        ],
        Performative::Transfer(t) => vec![
            Value::UInt(t.handle),
            opt_u32(t.delivery_id),
            Value::option(t.delivery_tag.clone(), |tag| Value::Binary(tag.into_bytes())),
            opt_u32(t.message_format),
            Value::option(t.settled, Value::Bool),
            flag(t.more),
            Value::option(t.rcv_settle_mode, |m| Value::UByte(m as u8)),
            opt_state(&t.state),
            flag(t.resume),
            flag(t.aborted),
            flag(t.batchable),
        ],
        Performative::Disposition(d) => vec![
            Value::Bool(d.role.as_bool()),
            Value::UInt(d.first),
            opt_u32(d.last),
            flag(d.settled),
            opt_state(&d.state),
            flag(d.batchable),
        ],
        Performative::Detach(d) => vec![Value::UInt(d.handle), flag(d.closed), opt_error(&d.error)],
        Performative::End(e) => vec![opt_error(&e.error)],
        Performative::Close(c) => vec![opt_error(&c.error)],
    };
    described_list(p.code(), fields)
}

/// Positional reader over the fields of a described list.
struct FieldList {
    fields: std::vec::IntoIter<Value>,
}

impl FieldList {
    fn next(&mut self) -> Value {
        self.fields.next().unwrap_or(Value::Null)
    }

    fn opt_u32(&mut self) -> Result<Option<u32>, DidntRead> {
        match self.next() {
            Value::Null => Ok(None),
            Value::UInt(v) => Ok(Some(v)),
            Value::UShort(v) => Ok(Some(v.into())),
            Value::UByte(v) => Ok(Some(v.into())),
            _ => Err(DidntRead),
        }
    }

    fn u32_or(&mut self, default: u32) -> Result<u32, DidntRead> {
        Ok(self.opt_u32()?.unwrap_or(default))
    }

    fn u32(&mut self) -> Result<u32, DidntRead> {
        self.opt_u32()?.ok_or(DidntRead)
    }

    fn opt_u64(&mut self) -> Result<Option<u64>, DidntRead> {
        match self.next() {
            Value::Null => Ok(None),
            Value::ULong(v) => Ok(Some(v)),
            Value::UInt(v) => Ok(Some(v.into())),
            _ => Err(DidntRead),
        }
    }

    fn opt_u16(&mut self) -> Result<Option<u16>, DidntRead> {
        match self.next() {
            Value::Null => Ok(None),
            Value::UShort(v) => Ok(Some(v)),
            Value::UByte(v) => Ok(Some(v.into())),
            _ => Err(DidntRead),
        }
    }

    fn opt_u8(&mut self) -> Result<Option<u8>, DidntRead> {
        match self.next() {
            Value::Null => Ok(None),
            Value::UByte(v) => Ok(Some(v)),
            _ => Err(DidntRead),
        }
    }

    fn opt_bool(&mut self) -> Result<Option<bool>, DidntRead> {
        match self.next() {
            Value::Null => Ok(None),
            Value::Bool(v) => Ok(Some(v)),
            _ => Err(DidntRead),
        }
    }

    fn bool(&mut self) -> Result<bool, DidntRead> {
        Ok(self.opt_bool()?.unwrap_or(false))
    }

    fn opt_string(&mut self) -> Result<Option<String>, DidntRead> {
        match self.next() {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            _ => Err(DidntRead),
        }
    }

    fn opt_symbol(&mut self) -> Result<Option<Symbol>, DidntRead> {
        match self.next() {
            Value::Null => Ok(None),
            Value::Symbol(s) => Ok(Some(s)),
            _ => Err(DidntRead),
        }
    }

    /// A multiple symbol field: null, one symbol, or an array of them.
    fn symbols(&mut self) -> Result<Vec<Symbol>, DidntRead> {
        match self.next() {
            Value::Null => Ok(Vec::new()),
            Value::Symbol(s) => Ok(vec![s]),
            Value::Array(items) => items
                .into_iter()
                .map(|i| match i {
                    Value::Symbol(s) => Ok(s),
                    _ => Err(DidntRead),
                })
                .collect(),
            _ => Err(DidntRead),
        }
    }

    fn fields(&mut self) -> Result<Option<Fields>, DidntRead> {
        value_to_fields(self.next())
    }

    fn error(&mut self) -> Result<Option<AmqpError>, DidntRead> {
        match self.next() {
            Value::Null => Ok(None),
            v => value_to_error(v).map(Some),
        }
    }

    fn state(&mut self) -> Result<Option<DeliveryState>, DidntRead> {
        match self.next() {
            Value::Null => Ok(None),
            v => value_to_state(v).map(Some),
        }
    }
}

fn value_to_fields(v: Value) -> Result<Option<Fields>, DidntRead> {
    match v {
        Value::Null => Ok(None),
        Value::Map(pairs) => pairs
            .into_iter()
            .map(|(k, v)| match k {
                Value::Symbol(s) => Ok((s, v)),
                _ => Err(DidntRead),
            })
            .collect::<Result<Fields, _>>()
            .map(Some),
        _ => Err(DidntRead),
    }
}

/// Splits a described list into its descriptor code and fields.
fn described_fields(v: Value) -> Result<(u64, FieldList), DidntRead> {
    let Value::Described(descriptor, body) = v else {
        return Err(DidntRead);
    };
    let code = descriptor_code(&descriptor).ok_or(DidntRead)?;
    match *body {
        Value::List(fields) => Ok((
            code,
            FieldList {
                fields: fields.into_iter(),
            },
        )),
        _ => Err(DidntRead),
    }
}

pub(crate) fn value_to_error(v: Value) -> Result<AmqpError, DidntRead> {
    let (code, mut f) = described_fields(v)?;
    if code != code::ERROR {
        return Err(DidntRead);
    }
    let condition = f.opt_symbol()?.ok_or(DidntRead)?;
    Ok(AmqpError {
        condition: ErrorCondition::from_symbol(condition.as_str()),
        description: f.opt_string()?,
        info: f.fields()?,
    })
}

fn value_to_state(v: Value) -> Result<DeliveryState, DidntRead> {
    let (code, mut f) = described_fields(v)?;
    let state = match code {
        DeliveryState::RECEIVED => DeliveryState::Received {
            section_number: f.u32()?,
            section_offset: f.opt_u64()?.ok_or(DidntRead)?,
        },
        DeliveryState::ACCEPTED => DeliveryState::Accepted,
        DeliveryState::REJECTED => DeliveryState::Rejected { error: f.error()? },
        DeliveryState::RELEASED => DeliveryState::Released,
        DeliveryState::MODIFIED => DeliveryState::Modified {
            delivery_failed: f.bool()?,
            undeliverable_here: f.bool()?,
            message_annotations: f.fields()?,
        },
        DeliveryState::TRANSACTIONAL => {
            let Value::Binary(txn_id) = f.next() else {
                return Err(DidntRead);
            };
            let outcome = f.state()?.map(Box::new);
            DeliveryState::Transactional { txn_id, outcome }
        }
        _ => return Err(DidntRead),
    };
    Ok(state)
}

fn value_to_source(v: Value) -> Result<Source, DidntRead> {
    let (code, mut f) = described_fields(v)?;
    if code != code::SOURCE {
        return Err(DidntRead);
    }
    Ok(Source {
        address: f.opt_string()?,
        durable: f.u32_or(0)?,
        expiry_policy: f.opt_symbol()?,
        timeout: f.u32_or(0)?,
        dynamic: f.bool()?,
        dynamic_node_properties: f.fields()?,
        distribution_mode: f.opt_symbol()?,
        filter: f.fields()?,
        default_outcome: f.state()?,
        outcomes: f.symbols()?,
        capabilities: f.symbols()?,
    })
}

fn value_to_target(v: Value) -> Result<Target, DidntRead> {
    let (code, mut f) = described_fields(v)?;
    if code != code::TARGET {
        return Err(DidntRead);
    }
    Ok(Target {
        address: f.opt_string()?,
        durable: f.u32_or(0)?,
        expiry_policy: f.opt_symbol()?,
        timeout: f.u32_or(0)?,
        dynamic: f.bool()?,
        dynamic_node_properties: f.fields()?,
        capabilities: f.symbols()?,
    })
}

pub(crate) fn from_value(v: Value) -> Result<Performative, DidntRead> {
    let (code, mut f) = described_fields(v)?;
    let p = match code {
        code::OPEN => Performative::Open(Open {
            container_id: f.opt_string()?.ok_or(DidntRead)?,
            hostname: f.opt_string()?,
            max_frame_size: f.u32_or(u32::MAX)?,
            channel_max: f.opt_u16()?.unwrap_or(u16::MAX),
            idle_time_out: f.opt_u32()?,
            outgoing_locales: f.symbols()?,
            incoming_locales: f.symbols()?,
            offered_capabilities: f.symbols()?,
            desired_capabilities: f.symbols()?,
            properties: f.fields()?,
        }),
        code::BEGIN => Performative::Begin(Begin {
            remote_channel: f.opt_u16()?,
            next_outgoing_id: f.u32()?,
            incoming_window: f.u32()?,
            outgoing_window: f.u32()?,
            handle_max: f.u32_or(u32::MAX)?,
            offered_capabilities: f.symbols()?,
            desired_capabilities: f.symbols()?,
            properties: f.fields()?,
        }),
        code::ATTACH => {
            let name = f.opt_string()?.ok_or(DidntRead)?;
            let handle = f.u32()?;
            let role = Role::from_bool(f.opt_bool()?.ok_or(DidntRead)?);
            let snd_settle_mode = match f.opt_u8()? {
                Some(m) => SenderSettleMode::from_u8(m).ok_or(DidntRead)?,
                None => SenderSettleMode::default(),
            };
            let rcv_settle_mode = match f.opt_u8()? {
                Some(m) => ReceiverSettleMode::from_u8(m).ok_or(DidntRead)?,
                None => ReceiverSettleMode::default(),
            };
            let source = match f.next() {
                Value::Null => None,
                v => Some(value_to_source(v)?),
            };
            let target = match f.next() {
                Value::Null => None,
                v => Some(value_to_target(v)?),
            };
            // The unsettled map is not used for link recovery.
            let _unsettled = f.next();
            Performative::Attach(Attach {
                name,
                handle,
                role,
                snd_settle_mode,
                rcv_settle_mode,
                source,
                target,
                incomplete_unsettled: f.bool()?,
                initial_delivery_count: f.opt_u32()?,
                max_message_size: f.opt_u64()?,
                offered_capabilities: f.symbols()?,
                desired_capabilities: f.symbols()?,
                properties: f.fields()?,
            })
        }
        code::FLOW => Performative::Flow(Flow {
            next_incoming_id: f.opt_u32()?,
            incoming_window: f.u32()?,
            next_outgoing_id: f.u32()?,
            outgoing_window: f.u32()?,
            handle: f.opt_u32()?,
            delivery_count: f.opt_u32()?,
            link_credit: f.opt_u32()?,
            available: f.opt_u32()?,
            drain: f.bool()?,
            echo: f.bool()?,
            properties: f.fields()?,
        }),
        code::TRANSFER => Performative::Transfer(Transfer {
            handle: f.u32()?,
            delivery_id: f.opt_u32()?,
            delivery_tag: match f.next() {
                Value::Null => None,
                Value::Binary(b) => Some(DeliveryTag::from(b)),
                _ => return Err(DidntRead),
            },
            message_format: f.opt_u32()?,
            settled: f.opt_bool()?,
            more: f.bool()?,
            rcv_settle_mode: match f.opt_u8()? {
                Some(m) => Some(ReceiverSettleMode::from_u8(m).ok_or(DidntRead)?),
                None => None,
            },
            state: f.state()?,
            resume: f.bool()?,
            aborted: f.bool()?,
            batchable: f.bool()?,
        }),
        code::DISPOSITION => Performative::Disposition(Disposition {
            role: Role::from_bool(f.opt_bool()?.ok_or(DidntRead)?),
            first: f.u32()?,
            last: f.opt_u32()?,
            settled: f.bool()?,
            state: f.state()?,
            batchable: f.bool()?,
        }),
        code::DETACH => Performative::Detach(Detach {
            handle: f.u32()?,
            closed: f.bool()?,
            error: f.error()?,
        }),
        code::END => Performative::End(End { error: f.error()? }),
        code::CLOSE => Performative::Close(Close { error: f.error()? }),
        _ => return Err(DidntRead),
    };
    Ok(p)
}

impl LCodec<&Performative> for AmqpCodec {
    fn w_len(self, x: &Performative) -> usize {
        self.w_len(&to_value(x))
    }
}

impl<W> WCodec<&Performative, &mut W> for AmqpCodec
where
    W: Writer,
{
    type Output = Result<(), DidntWrite>;

    fn write(self, writer: &mut W, x: &Performative) -> Self::Output {
        self.write(&mut *writer, &to_value(x))
    }
}

impl<R> RCodec<Performative, &mut R> for AmqpCodec
where
    R: Reader,
{
    type Error = DidntRead;

    fn read(self, reader: &mut R) -> Result<Performative, Self::Error> {
        let value: Value = self.read(&mut *reader)?;
        from_value(value)
    }
}
