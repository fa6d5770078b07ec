use std::collections::HashMap;
use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use super::frame::Frame;
use super::messages::{self, Message};

/// What a schema is used for on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// Empty (or selector-only) request, answered with the matching status frame.
    Poll,
    /// Configuration payload, answered by the receiver with ACK-ACK or ACK-NAK.
    Set,
    /// Command payload; some are acknowledged, some are not.
    Action,
    /// Informational payload, polled or unsolicited.
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    U1,
    U2,
    U4,
    I1,
    I2,
    I4,
    /// Fixed-length character or reserved byte array.
    Bytes(usize),
}

impl FieldKind {
    pub const fn size(self) -> usize {
        match self {
            FieldKind::U1 | FieldKind::I1 => 1,
            FieldKind::U2 | FieldKind::I2 => 2,
            FieldKind::U4 | FieldKind::I4 => 4,
            FieldKind::Bytes(len) => len,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
}

pub const fn field(name: &'static str, kind: FieldKind) -> Field {
    Field { name, kind }
}

const fn layout_len(fields: &[Field]) -> usize {
    let mut total = 0;
    let mut i = 0;
    while i < fields.len() {
        total += fields[i].kind.size();
        i += 1;
    }
    total
}

/// Static description of one UBX payload layout.
#[derive(Debug, PartialEq, Eq)]
pub struct Schema {
    pub name: &'static str,
    pub class: u8,
    pub id: u8,
    pub purpose: Purpose,
    pub fields: &'static [Field],
    /// Block of fields repeated until the end of the payload; empty for fixed layouts.
    pub repeated: &'static [Field],
}

impl Schema {
    pub const fn fixed_len(&self) -> usize {
        layout_len(self.fields)
    }

    pub const fn block_len(&self) -> usize {
        layout_len(self.repeated)
    }

    pub fn accepts(&self, len: usize) -> bool {
        let fixed = self.fixed_len();
        let block = self.block_len();
        if block == 0 {
            len == fixed
        } else {
            len >= fixed && (len - fixed) % block == 0
        }
    }

    /// Unpack a payload into field values in declared order.
    pub fn decode(&'static self, payload: &[u8]) -> Result<Record, RegistryError> {
        if !self.accepts(payload.len()) {
            return Err(RegistryError::MalformedPayload {
                class: self.class,
                id: self.id,
                len: payload.len(),
            });
        }

        let fixed = self.fixed_len();
        let fields = FieldSet::unpack(self.fields, &payload[..fixed]);
        let block = self.block_len();
        let blocks = if block == 0 {
            Vec::new()
        } else {
            payload[fixed..]
                .chunks_exact(block)
                .map(|chunk| FieldSet::unpack(self.repeated, chunk))
                .collect()
        };

        Ok(Record {
            schema: self,
            fields,
            blocks,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Unsigned(u32),
    Signed(i32),
    Bytes(Vec<u8>),
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::Unsigned(v.into())
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::Unsigned(v.into())
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Unsigned(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::Signed(v.into())
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Signed(v.into())
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Signed(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl<const N: usize> From<[u8; N]> for Value {
    fn from(v: [u8; N]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

/// Rust types that hold exactly one wire field kind.
pub trait FieldType: Sized + Into<Value> {
    const KIND: FieldKind;

    fn read(fields: &FieldSet, name: &'static str) -> Result<Self, RegistryError>;
}

macro_rules! field_type {
    ($ty:ty, $kind:ident, $getter:ident) => {
        impl FieldType for $ty {
            const KIND: FieldKind = FieldKind::$kind;

            fn read(fields: &FieldSet, name: &'static str) -> Result<Self, RegistryError> {
                fields.$getter(name)
            }
        }
    };
}

field_type!(u8, U1, u8);
field_type!(u16, U2, u16);
field_type!(u32, U4, unsigned);
field_type!(i8, I1, i8);
field_type!(i16, I2, i16);
field_type!(i32, I4, signed);

impl<const N: usize> FieldType for [u8; N] {
    const KIND: FieldKind = FieldKind::Bytes(N);

    fn read(fields: &FieldSet, name: &'static str) -> Result<Self, RegistryError> {
        fields.array(name)
    }
}

/// Values of one field layout, in layout order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSet {
    layout: &'static [Field],
    values: Vec<Value>,
}

impl FieldSet {
    fn zeroed(layout: &'static [Field]) -> Self {
        let values = layout
            .iter()
            .map(|f| match f.kind {
                FieldKind::U1 | FieldKind::U2 | FieldKind::U4 => Value::Unsigned(0),
                FieldKind::I1 | FieldKind::I2 | FieldKind::I4 => Value::Signed(0),
                FieldKind::Bytes(len) => Value::Bytes(vec![0; len]),
            })
            .collect();
        Self { layout, values }
    }

    // Caller guarantees `raw` is exactly the layout length.
    fn unpack(layout: &'static [Field], raw: &[u8]) -> Self {
        let mut offset = 0;
        let mut values = Vec::with_capacity(layout.len());
        for f in layout {
            let bytes = &raw[offset..offset + f.kind.size()];
            values.push(match f.kind {
                FieldKind::U1 => Value::Unsigned(bytes[0].into()),
                FieldKind::U2 => Value::Unsigned(LittleEndian::read_u16(bytes).into()),
                FieldKind::U4 => Value::Unsigned(LittleEndian::read_u32(bytes)),
                FieldKind::I1 => Value::Signed((bytes[0] as i8).into()),
                FieldKind::I2 => Value::Signed(LittleEndian::read_i16(bytes).into()),
                FieldKind::I4 => Value::Signed(LittleEndian::read_i32(bytes)),
                FieldKind::Bytes(_) => Value::Bytes(bytes.to_vec()),
            });
            offset += f.kind.size();
        }
        Self { layout, values }
    }

    fn pack_into(&self, out: &mut Vec<u8>) {
        for (f, value) in self.layout.iter().zip(&self.values) {
            let start = out.len();
            out.resize(start + f.kind.size(), 0);
            let slot = &mut out[start..];
            // Values are range-checked by `set`, so narrowing casts are lossless.
            match (f.kind, value) {
                (FieldKind::U1, Value::Unsigned(v)) => slot[0] = *v as u8,
                (FieldKind::U2, Value::Unsigned(v)) => LittleEndian::write_u16(slot, *v as u16),
                (FieldKind::U4, Value::Unsigned(v)) => LittleEndian::write_u32(slot, *v),
                (FieldKind::I1, Value::Signed(v)) => slot[0] = *v as i8 as u8,
                (FieldKind::I2, Value::Signed(v)) => LittleEndian::write_i16(slot, *v as i16),
                (FieldKind::I4, Value::Signed(v)) => LittleEndian::write_i32(slot, *v),
                (FieldKind::Bytes(_), Value::Bytes(b)) => slot[..b.len()].copy_from_slice(b),
                _ => {}
            }
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.layout.iter().position(|f| f.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.position(name).map(|idx| &self.values[idx])
    }

    pub fn unsigned(&self, name: &'static str) -> Result<u32, RegistryError> {
        match self.get(name) {
            Some(Value::Unsigned(v)) => Ok(*v),
            _ => Err(RegistryError::MissingField { field: name }),
        }
    }

    pub fn signed(&self, name: &'static str) -> Result<i32, RegistryError> {
        match self.get(name) {
            Some(Value::Signed(v)) => Ok(*v),
            _ => Err(RegistryError::MissingField { field: name }),
        }
    }

    pub fn bytes(&self, name: &'static str) -> Result<&[u8], RegistryError> {
        match self.get(name) {
            Some(Value::Bytes(v)) => Ok(v),
            _ => Err(RegistryError::MissingField { field: name }),
        }
    }

    pub fn u8(&self, name: &'static str) -> Result<u8, RegistryError> {
        u8::try_from(self.unsigned(name)?).map_err(|_| RegistryError::OutOfRange { field: name })
    }

    pub fn u16(&self, name: &'static str) -> Result<u16, RegistryError> {
        u16::try_from(self.unsigned(name)?).map_err(|_| RegistryError::OutOfRange { field: name })
    }

    pub fn i8(&self, name: &'static str) -> Result<i8, RegistryError> {
        i8::try_from(self.signed(name)?).map_err(|_| RegistryError::OutOfRange { field: name })
    }

    pub fn i16(&self, name: &'static str) -> Result<i16, RegistryError> {
        i16::try_from(self.signed(name)?).map_err(|_| RegistryError::OutOfRange { field: name })
    }

    pub fn array<const N: usize>(&self, name: &'static str) -> Result<[u8; N], RegistryError> {
        self.bytes(name)?
            .try_into()
            .map_err(|_| RegistryError::OutOfRange { field: name })
    }

    /// Store a value, checking it fits the declared field kind.
    pub fn set(
        &mut self,
        name: &'static str,
        value: impl Into<Value>,
    ) -> Result<&mut Self, RegistryError> {
        let idx = self
            .position(name)
            .ok_or(RegistryError::MissingField { field: name })?;
        let value = value.into();
        let fits = match (self.layout[idx].kind, &value) {
            (FieldKind::U1, Value::Unsigned(v)) => *v <= u32::from(u8::MAX),
            (FieldKind::U2, Value::Unsigned(v)) => *v <= u32::from(u16::MAX),
            (FieldKind::U4, Value::Unsigned(_)) => true,
            (FieldKind::I1, Value::Signed(v)) => i8::try_from(*v).is_ok(),
            (FieldKind::I2, Value::Signed(v)) => i16::try_from(*v).is_ok(),
            (FieldKind::I4, Value::Signed(_)) => true,
            (FieldKind::Bytes(len), Value::Bytes(b)) => b.len() <= len,
            _ => false,
        };
        if !fits {
            return Err(RegistryError::OutOfRange { field: name });
        }
        let value = match (self.layout[idx].kind, value) {
            (FieldKind::Bytes(len), Value::Bytes(mut b)) => {
                b.resize(len, 0);
                Value::Bytes(b)
            }
            (_, value) => value,
        };
        self.values[idx] = value;
        Ok(self)
    }
}

/// A payload decoded against a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    schema: &'static Schema,
    fields: FieldSet,
    blocks: Vec<FieldSet>,
}

impl Record {
    /// Zero-filled record without repeated blocks.
    pub fn new(schema: &'static Schema) -> Self {
        Self {
            schema,
            fields: FieldSet::zeroed(schema.fields),
            blocks: Vec::new(),
        }
    }

    pub fn schema(&self) -> &'static Schema {
        self.schema
    }

    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut FieldSet {
        &mut self.fields
    }

    pub fn blocks(&self) -> &[FieldSet] {
        &self.blocks
    }

    /// Append a zero-filled repeated block and return it for filling.
    pub fn push_block(&mut self) -> &mut FieldSet {
        self.blocks.push(FieldSet::zeroed(self.schema.repeated));
        let last = self.blocks.len() - 1;
        &mut self.blocks[last]
    }

    pub fn payload_len(&self) -> usize {
        self.schema.fixed_len() + self.blocks.len() * self.schema.block_len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload_len());
        self.fields.pack_into(&mut out);
        for block in &self.blocks {
            block.pack_into(&mut out);
        }
        out
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown message {class:#04x}/{id:#04x}")]
    UnknownMessage { class: u8, id: u8 },
    #[error("malformed payload of {len} bytes for message {class:#04x}/{id:#04x}")]
    MalformedPayload { class: u8, id: u8, len: usize },
    #[error("no field named {field}")]
    MissingField { field: &'static str },
    #[error("value out of range for field {field}")]
    OutOfRange { field: &'static str },
    #[error("inconsistent {message} payload: {reason}")]
    Inconsistent {
        message: &'static str,
        reason: &'static str,
    },
    #[error("payload does not fit a UBX frame")]
    Oversized,
}

/// A typed message bound to one static schema.
pub trait UbxMessage: Sized {
    const SCHEMA: &'static Schema;

    fn from_record(record: &Record) -> Result<Self, RegistryError>;

    fn to_record(&self) -> Result<Record, RegistryError>;

    fn to_payload(&self) -> Result<Vec<u8>, RegistryError> {
        Ok(self.to_record()?.encode())
    }

    fn to_frame(&self) -> Result<Frame, RegistryError> {
        let payload = self.to_payload()?;
        if payload.len() > usize::from(u16::MAX) {
            return Err(RegistryError::Oversized);
        }
        Ok(Frame::new(Self::SCHEMA.class, Self::SCHEMA.id, payload))
    }
}

type Builder = fn(&Record) -> Result<Message, RegistryError>;

fn build<M>(record: &Record) -> Result<Message, RegistryError>
where
    M: UbxMessage + Into<Message>,
{
    M::from_record(record).map(Into::into)
}

struct Entry {
    schema: &'static Schema,
    build: Builder,
}

/// Maps (class, id) to the schemas registered for it.
#[derive(Default)]
pub struct Registry {
    entries: HashMap<(u8, u8), Vec<Entry>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.values().flatten().map(|e| e.schema.name))
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with every message the gateway speaks.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        messages::register_all(&mut registry);
        registry
    }

    pub fn register<M>(&mut self)
    where
        M: UbxMessage + Into<Message>,
    {
        let schema = M::SCHEMA;
        let slot = self.entries.entry((schema.class, schema.id)).or_default();
        if slot.iter().any(|e| e.schema == schema) {
            return;
        }
        slot.push(Entry {
            schema,
            build: build::<M>,
        });
    }

    /// Schema for (class, id) that accepts a payload of `len` bytes.
    pub fn schema_for(&self, class: u8, id: u8, len: usize) -> Option<&'static Schema> {
        self.entries
            .get(&(class, id))?
            .iter()
            .find(|e| e.schema.accepts(len))
            .map(|e| e.schema)
    }

    pub fn decode(&self, class: u8, id: u8, payload: &[u8]) -> Result<Message, RegistryError> {
        let entries = self
            .entries
            .get(&(class, id))
            .ok_or(RegistryError::UnknownMessage { class, id })?;
        let entry = entries
            .iter()
            .find(|e| e.schema.accepts(payload.len()))
            .ok_or(RegistryError::MalformedPayload {
                class,
                id,
                len: payload.len(),
            })?;
        let record = entry.schema.decode(payload)?;
        (entry.build)(&record)
    }

    pub fn decode_frame(&self, frame: &Frame) -> Result<Message, RegistryError> {
        self.decode(frame.class, frame.id, &frame.payload)
    }

    /// Pack a typed message, refusing messages this registry does not know.
    pub fn encode<M: UbxMessage>(&self, message: &M) -> Result<Vec<u8>, RegistryError> {
        let schema = M::SCHEMA;
        let known = self
            .entries
            .get(&(schema.class, schema.id))
            .is_some_and(|entries| entries.iter().any(|e| e.schema == schema));
        if !known {
            return Err(RegistryError::UnknownMessage {
                class: schema.class,
                id: schema.id,
            });
        }
        message.to_payload()
    }
}
