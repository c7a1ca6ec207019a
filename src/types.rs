use crate::error::ValidationError;
use chrono::{DateTime, TimeDelta, Utc};
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use tokio_postgres::Row;

/// Enum para tipo de outage reportado pelos controladores (PostgreSQL)
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, ToSql, FromSql,
)]
#[serde(rename_all = "snake_case")]
#[postgres(name = "outage_type", rename_all = "snake_case")]
pub enum OutageType {
    LedOutage,
    TemperatureOutage,
}

impl OutageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutageType::LedOutage => "led_outage",
            OutageType::TemperatureOutage => "temperature_outage",
        }
    }
}

impl fmt::Display for OutageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutageType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "led_outage" => Ok(OutageType::LedOutage),
            "temperature_outage" => Ok(OutageType::TemperatureOutage),
            other => Err(ValidationError::UnknownOutageType(other.to_string())),
        }
    }
}

/// Identificador de janela agregada (BIGSERIAL no banco).
///
/// Sempre serializado como texto decimal: valores de 64 bits perdem
/// precisão em clientes que tratam números JSON como `f64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WindowId(pub i64);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for WindowId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

/// Amostra bruta de outage, como recebida do controlador.
/// Identidade: (controller_id, outage_type, occurred_at).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub controller_id: String,
    pub outage_type: OutageType,
    pub occurred_at: DateTime<Utc>,
}

impl RawEvent {
    /// Cria um evento validado (controller_id sem espaços nas pontas e não vazio).
    pub fn new(
        controller_id: &str,
        outage_type: OutageType,
        occurred_at: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let controller_id = controller_id.trim();
        if controller_id.is_empty() {
            return Err(ValidationError::EmptyControllerId);
        }
        Ok(Self {
            controller_id: controller_id.to_string(),
            outage_type,
            occurred_at,
        })
    }

    /// Revalida um evento que chegou pela fila (payload desserializado).
    pub fn validated(self) -> Result<Self, ValidationError> {
        Self::new(&self.controller_id, self.outage_type, self.occurred_at)
    }
}

/// Janela agregada de outage: [start_time, end_time] com start_time <= end_time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedWindow {
    pub id: WindowId,
    pub controller_id: String,
    pub outage_type: OutageType,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl AggregatedWindow {
    /// true se o intervalo expandido [start - gap, end + gap] contém `at`.
    pub fn accepts(&self, at: DateTime<Utc>, gap: TimeDelta) -> bool {
        earlier_by(self.start_time, gap) <= at && at <= later_by(self.end_time, gap)
    }
}

/// `at - gap`, saturando em `DateTime::<Utc>::MIN_UTC`.
pub fn earlier_by(at: DateTime<Utc>, gap: TimeDelta) -> DateTime<Utc> {
    at.checked_sub_signed(gap).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// `at + gap`, saturando em `DateTime::<Utc>::MAX_UTC`.
pub fn later_by(at: DateTime<Utc>, gap: TimeDelta) -> DateTime<Utc> {
    at.checked_add_signed(gap).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl TryFrom<Row> for AggregatedWindow {
    type Error = tokio_postgres::Error;

    fn try_from(row: Row) -> Result<Self, Self::Error> {
        Ok(Self {
            id: WindowId(row.try_get("id")?),
            controller_id: row.try_get("controller_id")?,
            outage_type: row.try_get("outage_type")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
        })
    }
}

/// Consulta validada de janelas: tipo, intervalo fechado e controlador opcional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowQuery {
    pub outage_type: OutageType,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub controller_id: Option<String>,
}

impl WindowQuery {
    pub fn new(
        outage_type: OutageType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        controller_id: Option<&str>,
    ) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::InvertedRange { start, end });
        }
        let controller_id = controller_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        Ok(Self {
            outage_type,
            start,
            end,
            controller_id,
        })
    }
}
