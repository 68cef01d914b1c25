//! Seam between the execution engine and the memory manager.
//!
//! The engine only sees [`MemoryBus`]; production wires it to the memory
//! service over HTTP, tests swap in an in-process fake.

use simnix_shared::error::SimError;
use simnix_shared::pcb::Pid;
use simnix_shared::rpc::{self, HttpClient};
use simnix_shared::wire::{
    ApiResponse, InstructionReply, PageSizeReply, ReadReply, ReadRequest, ResizeRequest,
    TranslateReply, WriteRequest,
};

pub trait MemoryBus {
    fn fetch_instruction(
        &self,
        pid: Pid,
        pc: u32,
    ) -> impl std::future::Future<Output = Result<String, SimError>> + Send;

    fn translate(
        &self,
        pid: Pid,
        logical: u32,
    ) -> impl std::future::Future<Output = Result<u32, SimError>> + Send;

    fn read(
        &self,
        address: u32,
        len: u32,
    ) -> impl std::future::Future<Output = Result<Vec<u8>, SimError>> + Send;

    fn write(
        &self,
        address: u32,
        data: Vec<u8>,
    ) -> impl std::future::Future<Output = Result<(), SimError>> + Send;

    fn resize(
        &self,
        pid: Pid,
        size: u32,
    ) -> impl std::future::Future<Output = Result<(), SimError>> + Send;
}

/// HTTP-backed memory bus.
pub struct HttpMemory {
    client: HttpClient,
    base: String,
}

impl HttpMemory {
    pub fn new(client: HttpClient, base_url: String) -> Self {
        HttpMemory {
            client,
            base: base_url,
        }
    }

    /// Frame/page size, fetched once at startup for MMU span splitting.
    pub async fn page_size(&self) -> Result<u32, SimError> {
        let reply: PageSizeReply =
            rpc::get_json(&self.client, &format!("{}/page-size", self.base)).await?;
        Ok(reply.page_size)
    }
}

impl MemoryBus for HttpMemory {
    async fn fetch_instruction(&self, pid: Pid, pc: u32) -> Result<String, SimError> {
        let url = format!("{}/instructions?pid={pid}&pc={pc}", self.base);
        let reply: InstructionReply = rpc::get_json(&self.client, &url).await?;
        Ok(reply.instruction)
    }

    async fn translate(&self, pid: Pid, logical: u32) -> Result<u32, SimError> {
        let url = format!("{}/translate?pid={pid}&address={logical}", self.base);
        let reply: TranslateReply = rpc::get_json(&self.client, &url).await?;
        Ok(reply.physical_address)
    }

    async fn read(&self, address: u32, len: u32) -> Result<Vec<u8>, SimError> {
        let url = format!("{}/read", self.base);
        let reply: ReadReply =
            rpc::post_json(&self.client, &url, &ReadRequest { address, size: len }).await?;
        Ok(reply.data)
    }

    async fn write(&self, address: u32, data: Vec<u8>) -> Result<(), SimError> {
        let url = format!("{}/write", self.base);
        let _: ApiResponse = rpc::post_json(&self.client, &url, &WriteRequest { address, data }).await?;
        Ok(())
    }

    async fn resize(&self, pid: Pid, size: u32) -> Result<(), SimError> {
        let url = format!("{}/resize", self.base);
        let _: ApiResponse =
            rpc::patch_json(&self.client, &url, &ResizeRequest { pid, size }).await?;
        Ok(())
    }
}
