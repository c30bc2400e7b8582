pub mod ddl;
pub mod run;
