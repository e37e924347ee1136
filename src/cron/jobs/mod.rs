pub mod collect_supply;
