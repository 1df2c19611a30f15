mod channel;
mod helper;
mod transaction;
