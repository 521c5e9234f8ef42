use crate::error::{Error, Result};

pub const MAX_NAME_LEN: usize = 50;
pub const MAX_SYMBOL_LEN: usize = 10;
pub const MAX_DESCRIPTION_LEN: usize = 500;

pub fn validate_amount(amount: f64) -> Result<()> {
    if !amount.is_finite() {
        return Err(Error::InvalidAmount(format!("{} is not a finite number", amount)));
    }
    if amount <= 0.0 {
        return Err(Error::InvalidAmount(format!("{} must be positive", amount)));
    }
    Ok(())
}

pub fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::ValidationError("Token name cannot be empty".to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(Error::ValidationError(format!(
            "Token name must be {} characters or less",
            MAX_NAME_LEN
        )));
    }
    Ok(name.to_string())
}

/// Normalizes to upper case and checks the symbol is short ASCII alphanumeric.
pub fn validate_symbol(symbol: &str) -> Result<String> {
    let symbol = symbol.trim().to_ascii_uppercase();
    if symbol.is_empty() {
        return Err(Error::ValidationError("Symbol cannot be empty".to_string()));
    }
    if symbol.len() > MAX_SYMBOL_LEN {
        return Err(Error::ValidationError(format!(
            "Symbol must be {} characters or less",
            MAX_SYMBOL_LEN
        )));
    }
    if !symbol.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()) {
        return Err(Error::ValidationError(
            "Symbol must contain only letters and digits".to_string(),
        ));
    }
    Ok(symbol)
}

pub fn validate_description(description: &str) -> Result<String> {
    let description = description.trim();
    if description.is_empty() {
        return Err(Error::ValidationError("Description cannot be empty".to_string()));
    }
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(Error::ValidationError(format!(
            "Description must be {} characters or less",
            MAX_DESCRIPTION_LEN
        )));
    }
    Ok(description.to_string())
}
