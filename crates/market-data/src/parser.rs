use order_book::{Order, OrderType, Price, Side};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("expected 6 comma-separated fields, found {0}")]
    FieldCount(usize),
    #[error("invalid {field}: {value}")]
    Field { field: &'static str, value: String },
}

/// True when the line is the optional header row.
pub fn is_header(line: &str) -> bool {
    line.contains("timestamp")
}

/// Parses one tick row: `timestamp,symbol,side,price,quantity,type`.
///
/// `type` values other than LIMIT fall back to MARKET. Every successfully
/// parsed row allocates a fresh global order id.
pub fn parse_line(line: &str) -> Result<Order, ParseError> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != 6 {
        return Err(ParseError::FieldCount(fields.len()));
    }

    let timestamp: u64 = fields[0].parse().map_err(|_| ParseError::Field {
        field: "timestamp",
        value: fields[0].to_string(),
    })?;
    let instrument = fields[1].to_string();
    let side = match fields[2] {
        "BUY" => Side::Buy,
        "SELL" => Side::Sell,
        other => {
            return Err(ParseError::Field {
                field: "side",
                value: other.to_string(),
            })
        }
    };
    let price: f64 = fields[3].parse().map_err(|_| ParseError::Field {
        field: "price",
        value: fields[3].to_string(),
    })?;
    let quantity: u32 = fields[4].parse().map_err(|_| ParseError::Field {
        field: "quantity",
        value: fields[4].to_string(),
    })?;
    let order_type = match fields[5] {
        "LIMIT" => OrderType::Limit,
        _ => OrderType::Market,
    };

    Ok(Order::new(
        instrument,
        order_type,
        side,
        Price::new(price),
        quantity,
        timestamp,
    ))
}
