mod batch;
mod reload;
