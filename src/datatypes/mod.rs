// ABOUTME: Strongly-typed GSM 03.40 / 03.38 field types used by the PDU codec
// ABOUTME: Addresses, alphabets, timestamps and user data headers

mod address;
mod data_coding;
pub mod gsm7;
mod numeric_plan_indicator;
mod timestamp;
mod type_of_number;
mod user_data_header;

pub use address::{
    Address, DEFAULT_COUNTRY_CODE, MAX_ADDRESS_DIGITS, format_phone_number, format_phone_number_with_country,
    validate_phone_number,
};
pub use data_coding::{Alphabet, CONCAT_HEADER_OCTETS, MAX_USER_DATA_OCTETS};
pub use numeric_plan_indicator::NumericPlanIndicator;
pub use timestamp::{SCTS_OCTETS, decode_scts, parse_scts};
pub use type_of_number::TypeOfNumber;
pub use user_data_header::{ConcatInfo, IEI_CONCAT_8BIT, IEI_CONCAT_16BIT, parse_concat};
