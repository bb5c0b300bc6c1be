mod database;
mod group;
mod postgres;
mod privilege;
mod schema;
mod user;
