//! Static catalog of the replicated market-data entities.
//!
//! Each entry describes the row image carried in the change envelope
//! (`before` and `after` share the same shape) and the destination row:
//! business fields in catalog order followed by the passthrough columns.

use std::fmt;
use std::str::FromStr;

use crate::error::CdcError;

/// Topic namespace used by the CDC connector (`<ns>.<ns>.<table>`).
pub const DEFAULT_NAMESPACE: &str = "binance";

/// Semantic type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// 64-bit integer.
    Long,
    /// 32-bit integer.
    Int,
    /// 64-bit float.
    Double,
    /// UTF-8 text.
    Text,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Long => "long",
            FieldType::Int => "int",
            FieldType::Double => "double",
            FieldType::Text => "text",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single named, typed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
}

const fn field(name: &'static str, field_type: FieldType) -> FieldSpec {
    FieldSpec { name, field_type }
}

use FieldType::{Double, Int, Long, Text};

/// Columns appended to every destination row, after the business fields.
pub const PASSTHROUGH_COLUMNS: [FieldSpec; 4] = [
    field("source", Text),
    field("op", Text),
    field("ts_ms", Long),
    field("transaction", Text),
];

/// Replicated entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Trade,
    OrderBookLevel,
    DailyTicker,
    Candlestick,
    LatestPrice,
}

impl EntityKind {
    /// All entities, in pipeline startup order.
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Trade,
        EntityKind::OrderBookLevel,
        EntityKind::DailyTicker,
        EntityKind::Candlestick,
        EntityKind::LatestPrice,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EntityKind::Trade => "trade",
            EntityKind::OrderBookLevel => "order_book_level",
            EntityKind::DailyTicker => "daily_ticker",
            EntityKind::Candlestick => "candlestick",
            EntityKind::LatestPrice => "latest_price",
        }
    }

    pub fn schema(self) -> &'static EntitySchema {
        match self {
            EntityKind::Trade => &TRADE,
            EntityKind::OrderBookLevel => &ORDER_BOOK_LEVEL,
            EntityKind::DailyTicker => &DAILY_TICKER,
            EntityKind::Candlestick => &CANDLESTICK,
            EntityKind::LatestPrice => &LATEST_PRICE,
        }
    }

    /// Resolve an entity by its name or by its default table name.
    pub fn from_name(name: &str) -> Result<Self, CdcError> {
        EntityKind::ALL
            .into_iter()
            .find(|e| e.name() == name || e.schema().table == name)
            .ok_or_else(|| CdcError::config(format!("unknown entity '{name}'")))
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EntityKind {
    type Err = CdcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::from_name(s)
    }
}

/// Shape of one entity: row image fields and destination naming.
#[derive(Debug, PartialEq, Eq)]
pub struct EntitySchema {
    pub entity: EntityKind,
    /// Default destination table, also the last segment of the topic name.
    pub table: &'static str,
    /// Row image fields, in column order.
    pub fields: &'static [FieldSpec],
    /// Natural identifier; destination primary key.
    pub primary_key: &'static str,
}

impl EntitySchema {
    /// Fields expected inside `after`.
    pub fn after_fields(&self) -> &'static [FieldSpec] {
        self.fields
    }

    /// Fields expected inside `before` (same shape as `after`).
    pub fn before_fields(&self) -> &'static [FieldSpec] {
        self.fields
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Position of the primary key in the row image.
    pub fn key_index(&self) -> usize {
        self.field_index(self.primary_key).unwrap_or(0)
    }

    /// Destination columns: business fields, then passthrough columns.
    pub fn columns(&self) -> impl Iterator<Item = &'static FieldSpec> {
        self.fields.iter().chain(PASSTHROUGH_COLUMNS.iter())
    }

    /// Topic the CDC connector publishes this entity to.
    pub fn default_topic(&self, namespace: &str) -> String {
        format!("{namespace}.{namespace}.{}", self.table)
    }
}

static TRADE: EntitySchema = EntitySchema {
    entity: EntityKind::Trade,
    table: "recent_trades",
    fields: &[
        field("id", Long),
        field("symbol", Text),
        field("trade_id", Long),
        field("price", Double),
        field("qty", Double),
        field("time", Long),
    ],
    primary_key: "id",
};

static ORDER_BOOK_LEVEL: EntitySchema = EntitySchema {
    entity: EntityKind::OrderBookLevel,
    table: "order_book",
    fields: &[
        field("id", Long),
        field("update_id", Long),
        field("symbol", Text),
        field("side", Text),
        field("price", Double),
        field("quantity", Double),
        field("captured_at", Long),
    ],
    primary_key: "id",
};

static DAILY_TICKER: EntitySchema = EntitySchema {
    entity: EntityKind::DailyTicker,
    table: "daily_ticker",
    fields: &[
        field("id", Long),
        field("symbol", Text),
        field("open_price", Double),
        field("high_price", Double),
        field("low_price", Double),
        field("last_price", Text),
        field("volume", Double),
        field("quote_volume", Text),
        field("open_time", Long),
        field("close_time", Long),
        field("first_id", Long),
        field("last_id", Long),
        field("count", Long),
    ],
    primary_key: "id",
};

static CANDLESTICK: EntitySchema = EntitySchema {
    entity: EntityKind::Candlestick,
    table: "klines",
    fields: &[
        field("id", Long),
        field("symbol", Text),
        field("open_time", Long),
        field("open_price", Double),
        field("high_price", Double),
        field("low_price", Double),
        field("close_price", Double),
        field("volume", Double),
        field("close_time", Long),
        field("num_trades", Int),
    ],
    primary_key: "id",
};

static LATEST_PRICE: EntitySchema = EntitySchema {
    entity: EntityKind::LatestPrice,
    table: "latest_prices",
    fields: &[
        field("id", Long),
        field("symbol", Text),
        field("price", Text),
        field("time", Long),
    ],
    primary_key: "id",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_entity_resolves_to_its_own_schema() {
        for entity in EntityKind::ALL {
            let schema = entity.schema();
            assert_eq!(schema.entity, entity);
            assert_eq!(schema.fields[schema.key_index()].name, "id");
            assert_eq!(schema.before_fields(), schema.after_fields());
        }
    }

    #[test]
    fn lookup_by_name_and_table() {
        assert_eq!(EntityKind::from_name("trade").unwrap(), EntityKind::Trade);
        assert_eq!(EntityKind::from_name("klines").unwrap(), EntityKind::Candlestick);
        assert_eq!("latest_price".parse::<EntityKind>().unwrap(), EntityKind::LatestPrice);

        let err = EntityKind::from_name("funding_rate").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn topic_naming_convention() {
        let schema = EntityKind::OrderBookLevel.schema();
        assert_eq!(schema.default_topic(DEFAULT_NAMESPACE), "binance.binance.order_book");
    }

    #[test]
    fn destination_columns_end_with_passthrough() {
        let names: Vec<&str> = EntityKind::LatestPrice.schema().columns().map(|c| c.name).collect();
        assert_eq!(
            names,
            ["id", "symbol", "price", "time", "source", "op", "ts_ms", "transaction"]
        );
    }

    #[test]
    fn candlestick_trade_count_is_int() {
        let schema = EntityKind::Candlestick.schema();
        let idx = schema.field_index("num_trades").unwrap();
        assert_eq!(schema.fields[idx].field_type, FieldType::Int);
    }
}
